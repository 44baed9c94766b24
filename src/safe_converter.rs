/// Narrowing cast for values whose range is already bounded by the surrounding logic, e.g. ack
///  counts limited by validated config. Panics if that bound is violated.
pub trait PrecheckedCast<T> {
    fn prechecked_cast(self) -> T;
}
impl PrecheckedCast<u8> for usize {
    fn prechecked_cast(self) -> u8 {
        self.try_into().expect("value should have been bounded to fit into a u8")
    }
}
