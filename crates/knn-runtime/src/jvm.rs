//! JVM-backed execution context.
//!
//! Wraps the `JNIEnv` of one native method invocation. Build a [`JvmEnv`] at
//! the top of the native method, hand `&JvmEnv` to the bridge, and let it drop
//! before returning to Java: durable references it still tracks are deleted
//! then.
//!
//! Method bindings and class identities are process-wide. Class identities
//! are global references that are never deleted, so cached method ids stay
//! valid for as long as the classes stay loaded.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::{Mutex, OnceLock, PoisonError};

use jni::errors::Error as JniError;
use jni::objects::{GlobalRef, JByteArray, JClass, JFloatArray, JMethodID, JObject, JString, JValue};
use jni::signature::{Primitive, ReturnType};
use jni::sys::{jbyte, jmethodID, jobject, jsize, jvalue};
use jni::JNIEnv;

use crate::binding::BindingCache;
use crate::env::Env;
use crate::error::RuntimeError;
use crate::signatures::Member;
use crate::value::{ClassRef, MethodId, ObjRef, ReturnKind, Value};

static BINDINGS: OnceLock<BindingCache> = OnceLock::new();
static CLASSES: OnceLock<Mutex<Vec<GlobalRef>>> = OnceLock::new();

fn classes() -> &'static Mutex<Vec<GlobalRef>> {
    CLASSES.get_or_init(|| Mutex::new(Vec::new()))
}

fn jni_error(err: JniError) -> RuntimeError {
    RuntimeError::Bridge(err.to_string())
}

fn raw_object(obj: ObjRef) -> jobject {
    obj.as_raw() as usize as jobject
}

fn to_obj_ref(obj: &JObject<'_>) -> Option<ObjRef> {
    ObjRef::from_raw(obj.as_raw() as usize as u64)
}

fn length(len: usize) -> Result<jsize, RuntimeError> {
    jsize::try_from(len)
        .map_err(|_| RuntimeError::Bridge(format!("array length {} exceeds jsize", len)))
}

/// `Env` over one native method invocation.
pub struct JvmEnv<'local> {
    env: RefCell<JNIEnv<'local>>,
    durable: RefCell<HashMap<u64, GlobalRef>>,
}

impl<'local> JvmEnv<'local> {
    pub fn new(env: JNIEnv<'local>) -> Self {
        Self {
            env: RefCell::new(env),
            durable: RefCell::new(HashMap::new()),
        }
    }

    /// Reference to a Java object argument, `None` for `null`.
    pub fn object(obj: &JObject<'_>) -> Option<ObjRef> {
        to_obj_ref(obj)
    }

    /// Clear the pending exception and describe it.
    fn take_exception(&self) -> RuntimeError {
        let mut env = self.env.borrow_mut();
        let throwable = match env.exception_occurred() {
            Ok(throwable) if !throwable.is_null() => throwable,
            _ => {
                return RuntimeError::Bridge("call failed without a pending exception".to_string())
            }
        };
        let _ = env.exception_clear();

        let message = env
            .call_method(&throwable, "toString", "()Ljava/lang/String;", &[])
            .and_then(|value| value.l());
        let message = match message {
            Ok(text) => {
                let text = JString::from(text);
                env.get_string(&text)
                    .map(String::from)
                    .unwrap_or_else(|_| "<unreadable>".to_string())
            }
            Err(_) => {
                let _ = env.exception_clear();
                "<unavailable>".to_string()
            }
        };

        RuntimeError::Exception {
            class: "java/lang/Throwable".to_string(),
            message,
        }
    }

    fn check<T>(&self, result: Result<T, JniError>) -> Result<T, RuntimeError> {
        match result {
            Ok(value) => Ok(value),
            Err(JniError::JavaException) => Err(self.take_exception()),
            Err(e) => {
                let pending = self.env.borrow().exception_check().unwrap_or(false);
                if pending {
                    Err(self.take_exception())
                } else {
                    Err(jni_error(e))
                }
            }
        }
    }
}

impl Env for JvmEnv<'_> {
    fn bindings(&self) -> &BindingCache {
        BINDINGS.get_or_init(BindingCache::new)
    }

    fn class_of(&self, obj: ObjRef) -> Result<ClassRef, RuntimeError> {
        // SAFETY: `obj` was issued by this runtime and is live for the call.
        let object = unsafe { JObject::from_raw(raw_object(obj)) };
        let class = self.env.borrow().get_object_class(&object);
        let class = self.check(class)?;

        let mut known = classes().lock().unwrap_or_else(PoisonError::into_inner);
        let env = self.env.borrow();
        for (index, global) in known.iter().enumerate() {
            if env.is_same_object(global.as_obj(), &class).map_err(jni_error)? {
                env.delete_local_ref(class).map_err(jni_error)?;
                return Ok(ClassRef::from_raw(index as u64));
            }
        }
        let global = env.new_global_ref(&class).map_err(jni_error)?;
        env.delete_local_ref(class).map_err(jni_error)?;
        known.push(global);
        Ok(ClassRef::from_raw((known.len() - 1) as u64))
    }

    fn resolve_method(&self, class: ClassRef, member: &Member) -> Result<MethodId, RuntimeError> {
        let known = classes().lock().unwrap_or_else(PoisonError::into_inner);
        let global = known
            .get(class.as_raw() as usize)
            .ok_or(RuntimeError::InvalidReference(class.as_raw()))?;
        let class_obj: &JClass<'_> = global.as_obj().into();

        let result = {
            let mut env = self.env.borrow_mut();
            env.get_method_id(class_obj, member.name, member.signature)
        };
        match result {
            Ok(id) => Ok(MethodId::from_raw(id.into_raw() as usize as u64)),
            Err(_) => {
                let _ = self.env.borrow().exception_clear();
                Err(RuntimeError::MethodNotFound {
                    class: format!("class#{}", class.as_raw()),
                    name: member.name.to_string(),
                    signature: member.signature.to_string(),
                })
            }
        }
    }

    fn call_method(
        &self,
        obj: ObjRef,
        method: MethodId,
        ret: ReturnKind,
        args: &[Value],
    ) -> Result<Value, RuntimeError> {
        let mut raw_args: Vec<jvalue> = Vec::with_capacity(args.len());
        for arg in args {
            raw_args.push(match arg {
                Value::Int(v) => JValue::Int(*v).as_jni(),
                Value::Long(v) => JValue::Long(*v).as_jni(),
                Value::Object(Some(o)) => jvalue { l: raw_object(*o) },
                Value::Object(None) => jvalue {
                    l: std::ptr::null_mut(),
                },
                Value::Void => {
                    return Err(RuntimeError::TypeMismatch {
                        expected: "argument",
                        actual: "void".to_string(),
                    })
                }
            });
        }
        let return_type = match ret {
            ReturnKind::Void => ReturnType::Primitive(Primitive::Void),
            ReturnKind::Int => ReturnType::Primitive(Primitive::Int),
            ReturnKind::Object => ReturnType::Object,
        };

        // SAFETY: `obj` is live for the call, `method` was resolved against its
        // class with a signature matching `ret` and `args`.
        let object = unsafe { JObject::from_raw(raw_object(obj)) };
        let method_id = unsafe { JMethodID::from_raw(method.as_raw() as usize as jmethodID) };
        let result = {
            let mut env = self.env.borrow_mut();
            unsafe { env.call_method_unchecked(&object, method_id, return_type, &raw_args) }
        };
        let value = self.check(result)?;

        match ret {
            ReturnKind::Void => Ok(Value::Void),
            ReturnKind::Int => Ok(Value::Int(value.i().map_err(jni_error)?)),
            ReturnKind::Object => {
                let returned = value.l().map_err(jni_error)?;
                Ok(Value::Object(to_obj_ref(&returned)))
            }
        }
    }

    fn new_byte_array(&self, len: usize) -> Result<ObjRef, RuntimeError> {
        let len = length(len)?;
        let array = self.env.borrow().new_byte_array(len);
        let array = self.check(array)?;
        let raw = array.into_raw();
        ObjRef::from_raw(raw as usize as u64)
            .ok_or_else(|| RuntimeError::Bridge("NewByteArray returned null".to_string()))
    }

    fn array_len(&self, array: ObjRef) -> Result<usize, RuntimeError> {
        // SAFETY: only the length is read; it does not depend on the element type.
        let array = unsafe { JByteArray::from_raw(raw_object(array)) };
        let len = self.env.borrow().get_array_length(&array);
        Ok(self.check(len)? as usize)
    }

    fn read_byte_region(
        &self,
        array: ObjRef,
        start: usize,
        buf: &mut [u8],
    ) -> Result<(), RuntimeError> {
        let array = unsafe { JByteArray::from_raw(raw_object(array)) };
        // SAFETY: u8 and jbyte have the same layout.
        let signed =
            unsafe { std::slice::from_raw_parts_mut(buf.as_mut_ptr() as *mut jbyte, buf.len()) };
        let result = self
            .env
            .borrow()
            .get_byte_array_region(&array, length(start)?, signed);
        self.check(result)
    }

    fn write_byte_region(
        &self,
        array: ObjRef,
        start: usize,
        buf: &[u8],
    ) -> Result<(), RuntimeError> {
        let array = unsafe { JByteArray::from_raw(raw_object(array)) };
        // SAFETY: u8 and jbyte have the same layout.
        let signed = unsafe { std::slice::from_raw_parts(buf.as_ptr() as *const jbyte, buf.len()) };
        let result = self
            .env
            .borrow()
            .set_byte_array_region(&array, length(start)?, signed);
        self.check(result)
    }

    fn float_elements(&self, array: ObjRef) -> Result<Vec<f32>, RuntimeError> {
        let len = self.array_len(array)?;
        let array = unsafe { JFloatArray::from_raw(raw_object(array)) };
        let mut values = vec![0f32; len];
        let result = self.env.borrow().get_float_array_region(&array, 0, &mut values);
        self.check(result)?;
        Ok(values)
    }

    fn byte_elements(&self, array: ObjRef) -> Result<Vec<i8>, RuntimeError> {
        let len = self.array_len(array)?;
        let array = unsafe { JByteArray::from_raw(raw_object(array)) };
        let mut values = vec![0i8; len];
        let result = self.env.borrow().get_byte_array_region(&array, 0, &mut values);
        self.check(result)?;
        Ok(values)
    }

    // Elements are region copies; nothing stays pinned.
    fn release_elements(&self, _array: ObjRef) {}

    fn new_durable_ref(&self, obj: ObjRef) -> Result<ObjRef, RuntimeError> {
        let object = unsafe { JObject::from_raw(raw_object(obj)) };
        let global = self.env.borrow().new_global_ref(&object);
        let global = self.check(global)?;
        let durable = to_obj_ref(global.as_obj())
            .ok_or_else(|| RuntimeError::Bridge("NewGlobalRef returned null".to_string()))?;
        self.durable.borrow_mut().insert(durable.as_raw(), global);
        Ok(durable)
    }

    fn delete_durable_ref(&self, obj: ObjRef) {
        // Dropping the GlobalRef deletes it.
        self.durable.borrow_mut().remove(&obj.as_raw());
    }

    fn delete_local_ref(&self, obj: ObjRef) {
        let object = unsafe { JObject::from_raw(raw_object(obj)) };
        let _ = self.env.borrow().delete_local_ref(object);
    }
}
