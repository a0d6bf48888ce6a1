//! HTTP byte ranges for the Silo storage node.
//!
//! [`RangeSet::parse`] turns a `Range` header into a sorted list of
//! non-touching intervals. [`RangeSender`] walks a byte stream once and
//! produces a full `200` body, a single `206` part, or a
//! `multipart/byteranges` body, slicing across chunk boundaries.

pub mod error;
pub mod parse;
pub mod sender;

pub use error::{RangeError, RangeResult};
pub use parse::{parse_range_token, ByteRange, RangeSet};
pub use sender::{ByteStream, RangeBody, RangeResponse, RangeSender, SendOptions};
