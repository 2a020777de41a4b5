//! Managed members the bridge calls, with their type signatures.
//!
//! The managed side must expose exactly these names and signatures.

/// A managed method name and its type signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Member {
    pub name: &'static str,
    pub signature: &'static str,
}

impl Member {
    pub const fn new(name: &'static str, signature: &'static str) -> Self {
        Self { name, signature }
    }
}

/// Readable index stream class.
pub const INPUT_STREAM_CLASS: &str = "org/knnstream/store/IndexInputWithBuffer";

/// Readable index stream class without a vector source.
pub const PLAIN_INPUT_STREAM_CLASS: &str = "org/knnstream/store/IndexInput";

/// Writable index stream class.
pub const OUTPUT_STREAM_CLASS: &str = "org/knnstream/store/IndexOutputWithBuffer";

/// Full-precision vector source class.
pub const VECTOR_SOURCE_CLASS: &str = "org/knnstream/store/VectorReader";

pub const BYTE_ARRAY_CLASS: &str = "[B";
pub const FLOAT_ARRAY_CLASS: &str = "[F";

/// `int read(byte[] buffer, int offset, int length)`; returns `-1` at end of stream.
pub const STREAM_READ: Member = Member::new("read", "([BII)I");

/// `VectorReader getFullPrecisionVectors()`
pub const STREAM_FULL_PRECISION_VECTORS: Member = Member::new(
    "getFullPrecisionVectors",
    "()Lorg/knnstream/store/VectorReader;",
);

/// `float[] nextFloatVector()`; `null` once exhausted.
pub const SOURCE_NEXT_FLOAT_VECTOR: Member = Member::new("nextFloatVector", "()[F");

/// `byte[] nextByteVector()`; `null` once exhausted.
pub const SOURCE_NEXT_BYTE_VECTOR: Member = Member::new("nextByteVector", "()[B");

/// `void write(byte[] buffer, int offset, int length)`
pub const STREAM_WRITE: Member = Member::new("write", "([BII)V");

/// `void flush()`
pub const STREAM_FLUSH: Member = Member::new("flush", "()V");
