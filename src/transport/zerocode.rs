use anyhow::bail;
use bytes::{BufMut, BytesMut};

/// Run-length encodes zero bytes: a run of zeros is written as `0x00` followed by the run's
///  length (1..=255). Longer runs are split.
pub fn zero_encode(data: &[u8], buf: &mut BytesMut) {
    let mut i = 0;
    while i < data.len() {
        if data[i] != 0 {
            buf.put_u8(data[i]);
            i += 1;
            continue;
        }

        let mut run_len = 0u8;
        while i < data.len() && data[i] == 0 && run_len < u8::MAX {
            run_len += 1;
            i += 1;
        }
        buf.put_u8(0);
        buf.put_u8(run_len);
    }
}

pub fn zero_decode(data: &[u8], buf: &mut BytesMut) -> anyhow::Result<()> {
    let mut i = 0;
    while i < data.len() {
        if data[i] != 0 {
            buf.put_u8(data[i]);
            i += 1;
            continue;
        }

        let Some(&run_len) = data.get(i + 1) else {
            bail!("zero-coded buffer ends in the middle of a run");
        };
        if run_len == 0 {
            bail!("zero-coded buffer contains an empty run");
        }
        buf.put_bytes(0, run_len as usize);
        i += 2;
    }
    Ok(())
}
