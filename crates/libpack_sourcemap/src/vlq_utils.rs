use std::iter::Peekable;

use crate::sourcemap_error::SourceMapError;

pub fn is_mapping_separator(byte: u8) -> bool {
  byte == b';' || byte == b','
}

/// Decode one VLQ segment and add it to the running `previous` value
pub fn read_relative_vlq<B>(previous: &mut i64, input: &mut Peekable<B>) -> Result<(), SourceMapError>
where
  B: Iterator<Item = u8>,
{
  let decoded = vlq::decode(input)?;
  let (new, overflowed) = previous.overflowing_add(decoded);
  if overflowed || new > (u32::MAX as i64) {
    return Err(SourceMapError::UnexpectedlyBigNumber("vlq segment"));
  }

  if new < 0 {
    return Err(SourceMapError::UnexpectedNegativeNumber("vlq segment"));
  }

  *previous = new;
  Ok(())
}
