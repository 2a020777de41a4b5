//! Mediators between native byte buffers and managed streams.
//!
//! Each mediator owns one [`Handle`] for the length of one load or store.
//! Bytes cross the boundary through a single transient managed byte array
//! that lives for one transfer and is deleted on every exit path.

use knn_runtime::signatures::{STREAM_FLUSH, STREAM_READ, STREAM_WRITE};
use knn_runtime::{Env, Handle, LocalRef, MethodId, ObjRef, ReturnKind, Value};
use tracing::{debug, trace};

use crate::error::StreamError;

/// Managed array lengths are `int`.
const MAX_CHUNK: usize = i32::MAX as usize;

fn handle<'e>(
    env: &'e dyn Env,
    stream: Option<ObjRef>,
    what: &'static str,
) -> Result<Handle<'e>, StreamError> {
    let stream = stream.ok_or(StreamError::MissingCollaborator(what))?;
    Ok(Handle::new(env, stream))
}

/// Pulls bytes from a managed readable stream.
#[derive(Debug)]
pub struct InputMediator<'e> {
    handle: Handle<'e>,
    chunk_size: usize,
    read: Option<MethodId>,
}

impl<'e> InputMediator<'e> {
    /// Mediator over `stream`. A null stream is rejected here.
    pub fn new(
        env: &'e dyn Env,
        stream: Option<ObjRef>,
        chunk_size: usize,
    ) -> Result<Self, StreamError> {
        Ok(Self {
            handle: handle(env, stream, "readable stream")?,
            chunk_size: chunk_size.clamp(1, MAX_CHUNK),
            read: None,
        })
    }

    pub fn handle(&self) -> Handle<'e> {
        self.handle
    }

    fn read_method(&mut self) -> Result<MethodId, StreamError> {
        if let Some(method) = self.read {
            return Ok(method);
        }
        let method = self.handle.env().method(self.handle.stream(), &STREAM_READ)?;
        self.read = Some(method);
        Ok(method)
    }

    /// Copy exactly `n` bytes from the stream into `dst[..n]`.
    ///
    /// Stops with [`StreamError::UnexpectedEof`] if the stream ends first;
    /// bytes already copied are left in `dst`.
    pub fn copy_bytes(&mut self, n: usize, dst: &mut [u8]) -> Result<(), StreamError> {
        if dst.len() < n {
            return Err(StreamError::BufferTooSmall {
                needed: n,
                actual: dst.len(),
            });
        }
        if n == 0 {
            return Ok(());
        }

        let read = self.read_method()?;
        let env = self.handle.env();
        let stream = self.handle.stream();
        let chunk_len = self.chunk_size.min(n);
        let chunk = LocalRef::new(env, env.new_byte_array(chunk_len)?);

        let mut copied = 0;
        while copied < n {
            let want = (n - copied).min(chunk_len);
            let got = env
                .call_method(
                    stream,
                    read,
                    ReturnKind::Int,
                    &[
                        Value::Object(Some(chunk.get())),
                        Value::Int(0),
                        Value::Int(want as i32),
                    ],
                )?
                .into_int()?;
            if got <= 0 {
                debug!(requested = n, copied, "Managed stream ended early");
                return Err(StreamError::UnexpectedEof {
                    requested: n,
                    copied,
                });
            }
            let got = got as usize;
            if got > want {
                return Err(StreamError::Protocol(format!(
                    "read returned {} bytes for a {} byte request",
                    got, want
                )));
            }
            env.read_byte_region(chunk.get(), 0, &mut dst[copied..copied + got])?;
            copied += got;
        }

        trace!(bytes = n, "Copied from managed stream");
        Ok(())
    }
}

/// Pushes bytes to a managed writable stream.
#[derive(Debug)]
pub struct OutputMediator<'e> {
    handle: Handle<'e>,
    chunk_size: usize,
    write: Option<MethodId>,
}

impl<'e> OutputMediator<'e> {
    /// Mediator over `stream`. A null stream is rejected here.
    pub fn new(
        env: &'e dyn Env,
        stream: Option<ObjRef>,
        chunk_size: usize,
    ) -> Result<Self, StreamError> {
        Ok(Self {
            handle: handle(env, stream, "writable stream")?,
            chunk_size: chunk_size.clamp(1, MAX_CHUNK),
            write: None,
        })
    }

    pub fn handle(&self) -> Handle<'e> {
        self.handle
    }

    fn write_method(&mut self) -> Result<MethodId, StreamError> {
        if let Some(method) = self.write {
            return Ok(method);
        }
        let method = self.handle.env().method(self.handle.stream(), &STREAM_WRITE)?;
        self.write = Some(method);
        Ok(method)
    }

    /// Write all of `data`. Empty input makes no managed call.
    pub fn write_bytes(&mut self, data: &[u8]) -> Result<(), StreamError> {
        if data.is_empty() {
            return Ok(());
        }

        let write = self.write_method()?;
        let env = self.handle.env();
        let stream = self.handle.stream();
        let chunk_len = self.chunk_size.min(data.len());
        let chunk = LocalRef::new(env, env.new_byte_array(chunk_len)?);

        for piece in data.chunks(chunk_len) {
            env.write_byte_region(chunk.get(), 0, piece)?;
            env.call_method(
                stream,
                write,
                ReturnKind::Void,
                &[
                    Value::Object(Some(chunk.get())),
                    Value::Int(0),
                    Value::Int(piece.len() as i32),
                ],
            )?;
        }

        trace!(bytes = data.len(), "Copied to managed stream");
        Ok(())
    }

    /// Flush the managed stream; returns once the managed flush completed.
    pub fn flush(&mut self) -> Result<(), StreamError> {
        let env = self.handle.env();
        let stream = self.handle.stream();
        let flush = env.method(stream, &STREAM_FLUSH)?;
        env.call_method(stream, flush, ReturnKind::Void, &[])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use knn_runtime::{LocalRuntime, RuntimeError, SharedBuffer};
    use std::io::Cursor;

    #[test]
    fn test_null_stream_rejected() {
        let runtime = LocalRuntime::new();
        let env = runtime.attach();
        assert!(matches!(
            InputMediator::new(&env, None, 16),
            Err(StreamError::MissingCollaborator("readable stream"))
        ));
        assert!(matches!(
            OutputMediator::new(&env, None, 16),
            Err(StreamError::MissingCollaborator("writable stream"))
        ));
    }

    #[test]
    fn test_copy_spans_chunks() {
        let runtime = LocalRuntime::new();
        let data: Vec<u8> = (0..100u8).collect();
        let stream = runtime.register_input(Cursor::new(data.clone()));
        let env = runtime.attach();
        let mut input = InputMediator::new(&env, Some(stream), 7).unwrap();

        let mut dst = vec![0u8; 100];
        input.copy_bytes(60, &mut dst).unwrap();
        input.copy_bytes(40, &mut dst[60..]).unwrap();
        assert_eq!(dst, data);
        // 60 bytes in 7-byte chunks, then 40 more.
        assert_eq!(runtime.calls("read"), 9 + 6);
        assert_eq!(runtime.stats().live_local_refs, 0);
    }

    #[test]
    fn test_short_stream_fails() {
        let runtime = LocalRuntime::new();
        let stream = runtime.register_input(Cursor::new(vec![1u8, 2, 3]));
        let env = runtime.attach();
        let mut input = InputMediator::new(&env, Some(stream), 64).unwrap();

        let mut dst = [0u8; 8];
        assert!(matches!(
            input.copy_bytes(8, &mut dst),
            Err(StreamError::UnexpectedEof {
                requested: 8,
                copied: 3
            })
        ));
        assert_eq!(runtime.stats().live_local_refs, 0);
    }

    #[test]
    fn test_zero_copy_makes_no_call() {
        let runtime = LocalRuntime::new();
        let stream = runtime.register_input(Cursor::new(vec![1u8]));
        let env = runtime.attach();
        let mut input = InputMediator::new(&env, Some(stream), 64).unwrap();
        input.copy_bytes(0, &mut [0u8; 0]).unwrap();
        assert_eq!(runtime.calls("read"), 0);
    }

    #[test]
    fn test_read_exception_propagates() {
        let runtime = LocalRuntime::new();
        let stream = runtime.register_input(Cursor::new(vec![0u8; 32]));
        runtime.fail_on("read", "stream closed");
        let env = runtime.attach();
        let mut input = InputMediator::new(&env, Some(stream), 64).unwrap();

        let err = input.copy_bytes(4, &mut [0u8; 4]).unwrap_err();
        assert!(err.is_exception());
        assert_eq!(runtime.stats().live_local_refs, 0);
    }

    #[test]
    fn test_write_in_chunks() {
        let runtime = LocalRuntime::new();
        let sink = SharedBuffer::new();
        let stream = runtime.register_output(sink.clone());
        let env = runtime.attach();
        let mut output = OutputMediator::new(&env, Some(stream), 4).unwrap();

        output.write_bytes(b"hello world").unwrap();
        output.flush().unwrap();
        assert_eq!(sink.contents(), b"hello world".to_vec());
        assert_eq!(runtime.calls("write"), 3);
        assert_eq!(runtime.calls("flush"), 1);
        assert_eq!(runtime.stats().live_local_refs, 0);
    }

    #[test]
    fn test_empty_write_makes_no_call() {
        let runtime = LocalRuntime::new();
        let stream = runtime.register_output(SharedBuffer::new());
        let env = runtime.attach();
        let mut output = OutputMediator::new(&env, Some(stream), 4).unwrap();
        output.write_bytes(&[]).unwrap();
        assert_eq!(runtime.calls("write"), 0);
        assert_eq!(runtime.bindings().resolutions(), 0);
    }

    #[test]
    fn test_wrong_stream_kind() {
        let runtime = LocalRuntime::new();
        let stream = runtime.register_output(SharedBuffer::new());
        let env = runtime.attach();
        let mut input = InputMediator::new(&env, Some(stream), 4).unwrap();
        assert!(matches!(
            input.copy_bytes(1, &mut [0u8; 1]),
            Err(StreamError::Runtime(RuntimeError::MethodNotFound { .. }))
        ));
    }
}
