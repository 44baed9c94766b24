use std::fmt::{Debug, Display, Formatter};

use uuid::Uuid;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ContentId(pub Uuid);

impl Display for ContentId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl Debug for ContentId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ContentId({})", self.0)
    }
}

impl From<Uuid> for ContentId {
    fn from(value: Uuid) -> Self {
        ContentId(value)
    }
}

/// Assets and textures are cached in separate pools and streamed with different wire messages
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ContentKind {
    Asset,
    Texture,
}

/// A piece of content is identified by its id *and* its kind: the same id requested as asset
///  and as texture refers to two unrelated pieces of content.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ContentKey {
    pub id: ContentId,
    pub kind: ContentKind,
}

impl ContentKey {
    pub fn new(id: impl Into<ContentId>, kind: ContentKind) -> ContentKey {
        ContentKey { id: id.into(), kind }
    }

    pub fn asset(id: impl Into<ContentId>) -> ContentKey {
        Self::new(id, ContentKind::Asset)
    }

    pub fn texture(id: impl Into<ContentId>) -> ContentKey {
        Self::new(id, ContentKind::Texture)
    }
}

impl Display for ContentKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}:{}", self.kind, self.id)
    }
}
