//! RAW coding: bit-packed encoding driven by the layout facts of each record/set.

mod decode;
mod encode;
mod tree;

pub(crate) use decode::{Hint, RawDecoder};
pub(crate) use encode::RawEncoder;
