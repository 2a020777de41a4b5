//! Object and reference tables for the in-process runtime.
//!
//! Objects are owned by the heap and reachable only through references.
//! A reference is either local to one attached call (a frame), durable, or a
//! root held by the host that registered the object. An object is dropped
//! once no reference targets it and none of its element buffers are pinned.

use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::sync::Arc;

use tracing::{trace, warn};

use crate::error::RuntimeError;
use crate::signatures::{
    Member, BYTE_ARRAY_CLASS, FLOAT_ARRAY_CLASS, INPUT_STREAM_CLASS, OUTPUT_STREAM_CLASS,
    PLAIN_INPUT_STREAM_CLASS, SOURCE_NEXT_BYTE_VECTOR, SOURCE_NEXT_FLOAT_VECTOR,
    STREAM_FLUSH, STREAM_FULL_PRECISION_VECTORS, STREAM_READ, STREAM_WRITE,
    VECTOR_SOURCE_CLASS,
};
use crate::value::{ClassRef, MethodId, ObjRef, ReturnKind, Value};

use super::streams::VectorSupply;

const IO_EXCEPTION: &str = "java/io/IOException";

pub(crate) const CLASS_INPUT: usize = 0;
pub(crate) const CLASS_PLAIN_INPUT: usize = 1;
pub(crate) const CLASS_OUTPUT: usize = 2;
pub(crate) const CLASS_VECTOR_SOURCE: usize = 3;
pub(crate) const CLASS_BYTE_ARRAY: usize = 4;
pub(crate) const CLASS_FLOAT_ARRAY: usize = 5;

/// Native behavior behind a managed method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Builtin {
    StreamRead,
    StreamFullPrecisionVectors,
    SourceNextFloat,
    SourceNextByte,
    StreamWrite,
    StreamFlush,
}

struct ClassDef {
    name: &'static str,
    methods: Vec<usize>,
}

struct MethodDef {
    class: usize,
    member: Member,
    builtin: Builtin,
    ret: ReturnKind,
}

pub(crate) enum Object {
    ByteArray(Vec<u8>),
    FloatArray(Vec<f32>),
    Input {
        reader: Box<dyn Read + Send>,
        vectors: Option<Arc<VectorSupply>>,
    },
    Output(Box<dyn Write + Send>),
    VectorSource {
        supply: Arc<VectorSupply>,
        cursor: usize,
    },
}

struct Slot {
    class: usize,
    object: Object,
    refs: usize,
    pins: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefKind {
    Local { frame: u64 },
    Durable,
    Root,
}

#[derive(Debug, Clone, Copy)]
struct RefEntry {
    target: u64,
    kind: RefKind,
}

/// Managed exception injected by a test.
struct FailurePlan {
    member: String,
    remaining_successes: usize,
    message: String,
}

pub(crate) struct Heap {
    classes: Vec<ClassDef>,
    methods: Vec<MethodDef>,
    objects: HashMap<u64, Slot>,
    refs: HashMap<u64, RefEntry>,
    frame_locals: HashMap<u64, usize>,
    next_object: u64,
    next_ref: u64,
    local_capacity: usize,
    pins: usize,
    calls: HashMap<&'static str, usize>,
    failures: Vec<FailurePlan>,
}

impl Heap {
    pub(crate) fn new(local_capacity: usize) -> Self {
        let mut heap = Self {
            classes: Vec::new(),
            methods: Vec::new(),
            objects: HashMap::new(),
            refs: HashMap::new(),
            frame_locals: HashMap::new(),
            next_object: 1,
            next_ref: 1,
            local_capacity,
            pins: 0,
            calls: HashMap::new(),
            failures: Vec::new(),
        };

        heap.define_class(
            INPUT_STREAM_CLASS,
            &[
                (STREAM_READ, Builtin::StreamRead, ReturnKind::Int),
                (
                    STREAM_FULL_PRECISION_VECTORS,
                    Builtin::StreamFullPrecisionVectors,
                    ReturnKind::Object,
                ),
            ],
        );
        heap.define_class(
            PLAIN_INPUT_STREAM_CLASS,
            &[(STREAM_READ, Builtin::StreamRead, ReturnKind::Int)],
        );
        heap.define_class(
            OUTPUT_STREAM_CLASS,
            &[
                (STREAM_WRITE, Builtin::StreamWrite, ReturnKind::Void),
                (STREAM_FLUSH, Builtin::StreamFlush, ReturnKind::Void),
            ],
        );
        heap.define_class(
            VECTOR_SOURCE_CLASS,
            &[
                (SOURCE_NEXT_FLOAT_VECTOR, Builtin::SourceNextFloat, ReturnKind::Object),
                (SOURCE_NEXT_BYTE_VECTOR, Builtin::SourceNextByte, ReturnKind::Object),
            ],
        );
        heap.define_class(BYTE_ARRAY_CLASS, &[]);
        heap.define_class(FLOAT_ARRAY_CLASS, &[]);
        heap
    }

    fn define_class(&mut self, name: &'static str, members: &[(Member, Builtin, ReturnKind)]) {
        let class = self.classes.len();
        let mut methods = Vec::with_capacity(members.len());
        for (member, builtin, ret) in members {
            methods.push(self.methods.len());
            self.methods.push(MethodDef {
                class,
                member: *member,
                builtin: *builtin,
                ret: *ret,
            });
        }
        self.classes.push(ClassDef { name, methods });
    }

    // --- references -------------------------------------------------------

    fn new_ref(&mut self, target: u64, kind: RefKind) -> Result<ObjRef, RuntimeError> {
        if let RefKind::Local { frame } = kind {
            let live = self.frame_locals.get(&frame).copied().unwrap_or(0);
            if live >= self.local_capacity {
                return Err(RuntimeError::LocalCapacityExceeded(self.local_capacity));
            }
        }
        let slot = self
            .objects
            .get_mut(&target)
            .ok_or(RuntimeError::InvalidReference(target))?;
        slot.refs += 1;
        if let RefKind::Local { frame } = kind {
            *self.frame_locals.entry(frame).or_insert(0) += 1;
        }

        let id = self.next_ref;
        self.next_ref += 1;
        self.refs.insert(id, RefEntry { target, kind });
        ObjRef::from_raw(id).ok_or(RuntimeError::InvalidReference(0))
    }

    /// Object id behind a reference usable from `frame`.
    fn target(&self, obj: ObjRef, frame: u64) -> Result<u64, RuntimeError> {
        match self.refs.get(&obj.as_raw()) {
            Some(RefEntry {
                kind: RefKind::Local { frame: owner },
                ..
            }) if *owner != frame => Err(RuntimeError::InvalidReference(obj.as_raw())),
            Some(entry) => Ok(entry.target),
            None => Err(RuntimeError::InvalidReference(obj.as_raw())),
        }
    }

    fn slot(&self, obj: ObjRef, frame: u64) -> Result<&Slot, RuntimeError> {
        let target = self.target(obj, frame)?;
        self.objects
            .get(&target)
            .ok_or(RuntimeError::InvalidReference(obj.as_raw()))
    }

    fn slot_mut(&mut self, obj: ObjRef, frame: u64) -> Result<&mut Slot, RuntimeError> {
        let target = self.target(obj, frame)?;
        self.objects
            .get_mut(&target)
            .ok_or(RuntimeError::InvalidReference(obj.as_raw()))
    }

    fn delete_ref(&mut self, obj: ObjRef, expected: fn(RefKind) -> bool) {
        let entry = match self.refs.get(&obj.as_raw()) {
            Some(entry) if expected(entry.kind) => *entry,
            Some(entry) => {
                warn!(obj = %obj, kind = ?entry.kind, "Deleting reference of the wrong kind");
                return;
            }
            None => {
                warn!(obj = %obj, "Deleting unknown reference");
                return;
            }
        };
        self.refs.remove(&obj.as_raw());
        if let RefKind::Local { frame } = entry.kind {
            if let Some(live) = self.frame_locals.get_mut(&frame) {
                *live = live.saturating_sub(1);
            }
        }
        if let Some(slot) = self.objects.get_mut(&entry.target) {
            slot.refs = slot.refs.saturating_sub(1);
        }
        self.collect(entry.target);
    }

    fn collect(&mut self, target: u64) {
        let unreachable = self
            .objects
            .get(&target)
            .map(|slot| slot.refs == 0 && slot.pins == 0)
            .unwrap_or(false);
        if unreachable {
            self.objects.remove(&target);
            trace!(object = target, "Collected object");
        }
    }

    pub(crate) fn delete_local(&mut self, obj: ObjRef) {
        self.delete_ref(obj, |kind| matches!(kind, RefKind::Local { .. }));
    }

    pub(crate) fn delete_durable(&mut self, obj: ObjRef) {
        self.delete_ref(obj, |kind| kind == RefKind::Durable);
    }

    pub(crate) fn delete_root(&mut self, obj: ObjRef) {
        self.delete_ref(obj, |kind| kind == RefKind::Root);
    }

    pub(crate) fn new_durable(&mut self, obj: ObjRef, frame: u64) -> Result<ObjRef, RuntimeError> {
        let target = self.target(obj, frame)?;
        self.new_ref(target, RefKind::Durable)
    }

    /// Delete every local reference created during `frame`.
    pub(crate) fn end_frame(&mut self, frame: u64) {
        let locals: Vec<u64> = self
            .refs
            .iter()
            .filter(|(_, entry)| entry.kind == RefKind::Local { frame })
            .map(|(id, _)| *id)
            .collect();
        for id in locals {
            if let Some(obj) = ObjRef::from_raw(id) {
                self.delete_local(obj);
            }
        }
        self.frame_locals.remove(&frame);
    }

    // --- objects ----------------------------------------------------------

    fn alloc(&mut self, class: usize, object: Object) -> u64 {
        let id = self.next_object;
        self.next_object += 1;
        self.objects.insert(
            id,
            Slot {
                class,
                object,
                refs: 0,
                pins: 0,
            },
        );
        id
    }

    fn alloc_local(
        &mut self,
        frame: u64,
        class: usize,
        object: Object,
    ) -> Result<ObjRef, RuntimeError> {
        let id = self.alloc(class, object);
        match self.new_ref(id, RefKind::Local { frame }) {
            Ok(obj) => Ok(obj),
            Err(e) => {
                self.collect(id);
                Err(e)
            }
        }
    }

    pub(crate) fn alloc_root(&mut self, class: usize, object: Object) -> ObjRef {
        let target = self.alloc(class, object);
        if let Some(slot) = self.objects.get_mut(&target) {
            slot.refs = 1;
        }
        let id = self.next_ref;
        self.next_ref += 1;
        self.refs.insert(
            id,
            RefEntry {
                target,
                kind: RefKind::Root,
            },
        );
        ObjRef::from_raw(id).unwrap_or_else(|| unreachable!("reference ids start at 1"))
    }

    pub(crate) fn new_byte_array(
        &mut self,
        frame: u64,
        len: usize,
    ) -> Result<ObjRef, RuntimeError> {
        self.alloc_local(frame, CLASS_BYTE_ARRAY, Object::ByteArray(vec![0; len]))
    }

    pub(crate) fn class_of(&self, obj: ObjRef, frame: u64) -> Result<ClassRef, RuntimeError> {
        Ok(ClassRef::from_raw(self.slot(obj, frame)?.class as u64))
    }

    pub(crate) fn array_len(&self, obj: ObjRef, frame: u64) -> Result<usize, RuntimeError> {
        match &self.slot(obj, frame)?.object {
            Object::ByteArray(bytes) => Ok(bytes.len()),
            Object::FloatArray(floats) => Ok(floats.len()),
            _ => Err(self.type_mismatch("array", obj, frame)),
        }
    }

    pub(crate) fn read_byte_region(
        &self,
        obj: ObjRef,
        frame: u64,
        start: usize,
        buf: &mut [u8],
    ) -> Result<(), RuntimeError> {
        match &self.slot(obj, frame)?.object {
            Object::ByteArray(bytes) => {
                let region = region(bytes.len(), start, buf.len())?;
                buf.copy_from_slice(&bytes[region]);
                Ok(())
            }
            _ => Err(self.type_mismatch("byte[]", obj, frame)),
        }
    }

    pub(crate) fn write_byte_region(
        &mut self,
        obj: ObjRef,
        frame: u64,
        start: usize,
        buf: &[u8],
    ) -> Result<(), RuntimeError> {
        match &mut self.slot_mut(obj, frame)?.object {
            Object::ByteArray(bytes) => {
                let region = region(bytes.len(), start, buf.len())?;
                bytes[region].copy_from_slice(buf);
                Ok(())
            }
            _ => Err(self.type_mismatch("byte[]", obj, frame)),
        }
    }

    pub(crate) fn float_elements(
        &mut self,
        obj: ObjRef,
        frame: u64,
    ) -> Result<Vec<f32>, RuntimeError> {
        let values = match &self.slot(obj, frame)?.object {
            Object::FloatArray(floats) => floats.clone(),
            _ => return Err(self.type_mismatch("float[]", obj, frame)),
        };
        self.pin(obj, frame)?;
        Ok(values)
    }

    pub(crate) fn byte_elements(
        &mut self,
        obj: ObjRef,
        frame: u64,
    ) -> Result<Vec<i8>, RuntimeError> {
        let values = match &self.slot(obj, frame)?.object {
            Object::ByteArray(bytes) => bytes.iter().map(|b| *b as i8).collect(),
            _ => return Err(self.type_mismatch("byte[]", obj, frame)),
        };
        self.pin(obj, frame)?;
        Ok(values)
    }

    fn pin(&mut self, obj: ObjRef, frame: u64) -> Result<(), RuntimeError> {
        self.slot_mut(obj, frame)?.pins += 1;
        self.pins += 1;
        Ok(())
    }

    pub(crate) fn release_elements(&mut self, obj: ObjRef, frame: u64) {
        let target = match self.target(obj, frame) {
            Ok(target) => target,
            Err(_) => {
                warn!(obj = %obj, "Releasing elements of unknown array");
                return;
            }
        };
        if let Some(slot) = self.objects.get_mut(&target) {
            if slot.pins > 0 {
                slot.pins -= 1;
                self.pins = self.pins.saturating_sub(1);
            }
        }
        self.collect(target);
    }

    fn type_mismatch(&self, expected: &'static str, obj: ObjRef, frame: u64) -> RuntimeError {
        let actual = self
            .slot(obj, frame)
            .map(|slot| self.classes[slot.class].name.to_string())
            .unwrap_or_else(|_| "<invalid>".to_string());
        RuntimeError::TypeMismatch { expected, actual }
    }

    // --- methods ----------------------------------------------------------

    pub(crate) fn resolve_method(
        &self,
        class: ClassRef,
        member: &Member,
    ) -> Result<MethodId, RuntimeError> {
        let def = self
            .classes
            .get(class.as_raw() as usize)
            .ok_or(RuntimeError::InvalidReference(class.as_raw()))?;
        def.methods
            .iter()
            .copied()
            .find(|&m| {
                self.methods[m].member.name == member.name
                    && self.methods[m].member.signature == member.signature
            })
            .map(|m| MethodId::from_raw(m as u64))
            .ok_or_else(|| RuntimeError::MethodNotFound {
                class: def.name.to_string(),
                name: member.name.to_string(),
                signature: member.signature.to_string(),
            })
    }

    pub(crate) fn call_method(
        &mut self,
        frame: u64,
        obj: ObjRef,
        method: MethodId,
        ret: ReturnKind,
        args: &[Value],
    ) -> Result<Value, RuntimeError> {
        let (class, member, builtin, declared) = {
            let def = self
                .methods
                .get(method.as_raw() as usize)
                .ok_or(RuntimeError::InvalidReference(method.as_raw()))?;
            (def.class, def.member, def.builtin, def.ret)
        };
        if self.slot(obj, frame)?.class != class {
            return Err(self.type_mismatch(self.classes[class].name, obj, frame));
        }
        if declared != ret {
            return Err(RuntimeError::TypeMismatch {
                expected: "declared return kind",
                actual: format!("{:?}", ret),
            });
        }

        *self.calls.entry(member.name).or_insert(0) += 1;
        self.check_failure(member.name)?;

        match builtin {
            Builtin::StreamRead => self.stream_read(frame, obj, args),
            Builtin::StreamFullPrecisionVectors => self.full_precision_vectors(frame, obj),
            Builtin::SourceNextFloat => self.next_vector(frame, obj, true),
            Builtin::SourceNextByte => self.next_vector(frame, obj, false),
            Builtin::StreamWrite => self.stream_write(frame, obj, args),
            Builtin::StreamFlush => self.stream_flush(frame, obj),
        }
    }

    fn check_failure(&mut self, member: &str) -> Result<(), RuntimeError> {
        if let Some(plan) = self.failures.iter_mut().find(|p| p.member == member) {
            if plan.remaining_successes > 0 {
                plan.remaining_successes -= 1;
            } else {
                return Err(RuntimeError::Exception {
                    class: IO_EXCEPTION.to_string(),
                    message: plan.message.clone(),
                });
            }
        }
        Ok(())
    }

    fn stream_read(
        &mut self,
        frame: u64,
        obj: ObjRef,
        args: &[Value],
    ) -> Result<Value, RuntimeError> {
        let (buffer, offset, len) = buffer_args(args)?;
        let capacity = self.array_len(buffer, frame)?;
        region(capacity, offset, len)?;
        if len == 0 {
            return Ok(Value::Int(0));
        }

        let mut chunk = vec![0u8; len];
        let read = match &mut self.slot_mut(obj, frame)?.object {
            Object::Input { reader, .. } => read_some(&mut **reader, &mut chunk)?,
            _ => return Err(self.type_mismatch("input stream", obj, frame)),
        };
        if read == 0 {
            return Ok(Value::Int(-1));
        }
        self.write_byte_region(buffer, frame, offset, &chunk[..read])?;
        Ok(Value::Int(read as i32))
    }

    fn full_precision_vectors(&mut self, frame: u64, obj: ObjRef) -> Result<Value, RuntimeError> {
        let supply = match &self.slot(obj, frame)?.object {
            Object::Input { vectors, .. } => vectors.clone(),
            _ => return Err(self.type_mismatch("input stream", obj, frame)),
        };
        match supply {
            Some(supply) => {
                let source = self.alloc_local(
                    frame,
                    CLASS_VECTOR_SOURCE,
                    Object::VectorSource { supply, cursor: 0 },
                )?;
                Ok(Value::Object(Some(source)))
            }
            None => Ok(Value::Object(None)),
        }
    }

    fn next_vector(&mut self, frame: u64, obj: ObjRef, float: bool) -> Result<Value, RuntimeError> {
        let next = match &mut self.slot_mut(obj, frame)?.object {
            Object::VectorSource { supply, cursor } => {
                // Advances even when the supply holds the other encoding.
                let position = *cursor;
                *cursor += 1;
                match (&**supply, float) {
                    (VectorSupply::Float(vectors), true) => vectors
                        .get(position)
                        .map(|v| (CLASS_FLOAT_ARRAY, Object::FloatArray(v.clone()))),
                    (VectorSupply::Int8(vectors), false) => vectors.get(position).map(|v| {
                        (
                            CLASS_BYTE_ARRAY,
                            Object::ByteArray(v.iter().map(|b| *b as u8).collect()),
                        )
                    }),
                    _ => None,
                }
            }
            _ => return Err(self.type_mismatch("vector source", obj, frame)),
        };
        match next {
            Some((class, object)) => {
                Ok(Value::Object(Some(self.alloc_local(frame, class, object)?)))
            }
            None => Ok(Value::Object(None)),
        }
    }

    fn stream_write(
        &mut self,
        frame: u64,
        obj: ObjRef,
        args: &[Value],
    ) -> Result<Value, RuntimeError> {
        let (buffer, offset, len) = buffer_args(args)?;
        let mut chunk = vec![0u8; len];
        self.read_byte_region(buffer, frame, offset, &mut chunk)?;
        match &mut self.slot_mut(obj, frame)?.object {
            Object::Output(writer) => writer.write_all(&chunk).map_err(io_exception)?,
            _ => return Err(self.type_mismatch("output stream", obj, frame)),
        }
        Ok(Value::Void)
    }

    fn stream_flush(&mut self, frame: u64, obj: ObjRef) -> Result<Value, RuntimeError> {
        match &mut self.slot_mut(obj, frame)?.object {
            Object::Output(writer) => writer.flush().map_err(io_exception)?,
            _ => return Err(self.type_mismatch("output stream", obj, frame)),
        }
        Ok(Value::Void)
    }

    // --- test hooks and stats ---------------------------------------------

    pub(crate) fn fail_after(&mut self, member: &str, successes: usize, message: &str) {
        self.failures.retain(|p| p.member != member);
        self.failures.push(FailurePlan {
            member: member.to_string(),
            remaining_successes: successes,
            message: message.to_string(),
        });
    }

    pub(crate) fn clear_failures(&mut self) {
        self.failures.clear();
    }

    pub(crate) fn calls(&self, member: &str) -> usize {
        self.calls.get(member).copied().unwrap_or(0)
    }

    pub(crate) fn count_refs(&self) -> (usize, usize) {
        self.refs.values().fold((0, 0), |(local, durable), entry| match entry.kind {
            RefKind::Local { .. } => (local + 1, durable),
            RefKind::Durable => (local, durable + 1),
            RefKind::Root => (local, durable),
        })
    }

    pub(crate) fn pinned(&self) -> usize {
        self.pins
    }

    pub(crate) fn object_count(&self) -> usize {
        self.objects.len()
    }
}

fn region(length: usize, start: usize, len: usize) -> Result<std::ops::Range<usize>, RuntimeError> {
    match start.checked_add(len) {
        Some(end) if end <= length => Ok(start..end),
        _ => Err(RuntimeError::OutOfBounds { start, len, length }),
    }
}

fn buffer_args(args: &[Value]) -> Result<(ObjRef, usize, usize), RuntimeError> {
    match args {
        [Value::Object(Some(buffer)), Value::Int(offset), Value::Int(len)]
            if *offset >= 0 && *len >= 0 =>
        {
            Ok((*buffer, *offset as usize, *len as usize))
        }
        _ => Err(RuntimeError::TypeMismatch {
            expected: "(byte[], int, int)",
            actual: format!("{:?}", args),
        }),
    }
}

fn read_some(reader: &mut dyn Read, buf: &mut [u8]) -> Result<usize, RuntimeError> {
    loop {
        match reader.read(buf) {
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(io_exception(e)),
        }
    }
}

fn io_exception(err: std::io::Error) -> RuntimeError {
    RuntimeError::Exception {
        class: IO_EXCEPTION.to_string(),
        message: err.to_string(),
    }
}
