//! Vector encodings and metrics.
//!
//! A vector record is not self-describing: the caller asking for a record
//! says which encoding it expects. Whatever the source encoding, records are
//! always handed to the engine as 32-bit floats, so sizes are validated
//! against the widened float length.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Size in bytes of one widened element.
pub const FLOAT_SIZE: usize = std::mem::size_of::<f32>();

/// Encoding of a vector record on the managed side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorEncoding {
    /// Full-precision 32-bit floats
    Float32,
    /// Signed 8-bit integer codes
    Int8,
}

impl VectorEncoding {
    /// Width in bytes of one element in this encoding.
    pub fn element_width(self) -> usize {
        match self {
            VectorEncoding::Float32 => FLOAT_SIZE,
            VectorEncoding::Int8 => 1,
        }
    }

    /// Tag used in serialized headers.
    pub fn tag(self) -> u8 {
        match self {
            VectorEncoding::Float32 => 0,
            VectorEncoding::Int8 => 1,
        }
    }

    /// Parse a header tag.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(VectorEncoding::Float32),
            1 => Some(VectorEncoding::Int8),
            _ => None,
        }
    }

    /// Byte length of `elements` values once widened to floats.
    ///
    /// Returns `None` on overflow.
    pub fn widened_byte_len(elements: usize) -> Option<usize> {
        elements.checked_mul(FLOAT_SIZE)
    }
}

impl fmt::Display for VectorEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VectorEncoding::Float32 => write!(f, "float"),
            VectorEncoding::Int8 => write!(f, "int8"),
        }
    }
}

impl FromStr for VectorEncoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "float" | "float32" | "f32" => Ok(VectorEncoding::Float32),
            "int8" | "byte" | "i8" => Ok(VectorEncoding::Int8),
            other => Err(format!("unknown vector encoding: {}", other)),
        }
    }
}

/// Distance metric stored in an index header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Squared euclidean distance (lower is closer)
    #[default]
    L2,
    /// Inner product (higher is closer)
    InnerProduct,
}

impl Metric {
    pub fn tag(self) -> u8 {
        match self {
            Metric::L2 => 0,
            Metric::InnerProduct => 1,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Metric::L2),
            1 => Some(Metric::InnerProduct),
            _ => None,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::L2 => write!(f, "l2"),
            Metric::InnerProduct => write!(f, "innerproduct"),
        }
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "l2" => Ok(Metric::L2),
            "ip" | "innerproduct" | "inner_product" => Ok(Metric::InnerProduct),
            other => Err(format!("unknown metric: {}", other)),
        }
    }
}
