//! The whitelisted library surface of the sandbox
//!
//! Only the operations the targeted decrypt routines actually reach are
//! implemented: string and string-builder manipulation, `System.arraycopy`,
//! and the DES decryption suite. Every other library call is a
//! [`SandboxError::ForbiddenCall`] - that refusal is the sandbox boundary
//! for code we cannot materialize from the class table.

use crate::interp::error::SandboxError;
use crate::interp::value::{new_obj, CipherState, Obj, ObjRef, Value};
use crate::jvm::code::MethodRef;
use crate::jvm::names;

/// Cipher transformation this engine knows how to run
const DES_CBC_PKCS5: &str = "DES/CBC/PKCS5Padding";

/// `javax.crypto.Cipher.DECRYPT_MODE`
const DECRYPT_MODE: i32 = 2;

/// Invoke a whitelisted library routine
///
/// `receiver` is `Some` for instance calls (including constructors on a
/// freshly allocated blank object) and `None` for static calls.
pub(crate) fn invoke(
    mref: &MethodRef,
    receiver: Option<&Value>,
    args: &[Value],
) -> Result<Option<Value>, SandboxError> {
    let key = (mref.owner.as_str(), mref.name.as_str(), mref.descriptor.as_str());
    match key {
        (names::JAVA_LANG_OBJECT, names::INIT, "()V") => Ok(None),

        // ---- java.lang.String ----
        (names::JAVA_LANG_STRING, names::INIT, "([C)V") => {
            let units = char_array_arg(&args[0])?;
            construct(receiver, Obj::Str(String::from_utf16_lossy(&units)))
        }
        (names::JAVA_LANG_STRING, names::INIT, "([B)V") => {
            let bytes = byte_array_arg(&args[0])?;
            construct(receiver, Obj::Str(decode_charset(&bytes, "UTF-8")?))
        }
        (names::JAVA_LANG_STRING, names::INIT, "([BLjava/lang/String;)V") => {
            let bytes = byte_array_arg(&args[0])?;
            let charset = str_arg(&args[1])?;
            construct(receiver, Obj::Str(decode_charset(&bytes, &charset)?))
        }
        (names::JAVA_LANG_STRING, names::INIT, "(Ljava/lang/String;)V") => {
            let copied = str_arg(&args[0])?;
            construct(receiver, Obj::Str(copied))
        }
        (names::JAVA_LANG_STRING, "length", "()I") => {
            let s = receiver_str(receiver)?;
            Ok(Some(Value::Int(s.encode_utf16().count() as i32)))
        }
        (names::JAVA_LANG_STRING, "charAt", "(I)C") => {
            let s = receiver_str(receiver)?;
            let index = int_arg(&args[0])?;
            let units: Vec<u16> = s.encode_utf16().collect();
            let unit = units.get(usize::try_from(index).ok().ok_or(
                SandboxError::IndexOutOfBounds {
                    index,
                    length: units.len(),
                },
            )?);
            match unit {
                Some(unit) => Ok(Some(Value::Int(*unit as i32))),
                None => Err(SandboxError::IndexOutOfBounds {
                    index,
                    length: units.len(),
                }),
            }
        }
        (names::JAVA_LANG_STRING, "toCharArray", "()[C") => {
            let s = receiver_str(receiver)?;
            Ok(Some(Value::Ref(new_obj(Obj::CharArray(
                s.encode_utf16().collect(),
            )))))
        }
        (names::JAVA_LANG_STRING, "getBytes", "()[B") => {
            let s = receiver_str(receiver)?;
            Ok(Some(byte_array_value(encode_charset(&s, "UTF-8")?)))
        }
        (names::JAVA_LANG_STRING, "getBytes", "(Ljava/lang/String;)[B") => {
            let s = receiver_str(receiver)?;
            let charset = str_arg(&args[0])?;
            Ok(Some(byte_array_value(encode_charset(&s, &charset)?)))
        }
        (names::JAVA_LANG_STRING, "intern", "()Ljava/lang/String;") => {
            let obj = receiver_ref(receiver)?;
            Ok(Some(Value::Ref(obj)))
        }
        (names::JAVA_LANG_STRING, "hashCode", "()I") => {
            let s = receiver_str(receiver)?;
            let hash = s
                .encode_utf16()
                .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(unit as i32));
            Ok(Some(Value::Int(hash)))
        }
        (names::JAVA_LANG_STRING, "equals", "(Ljava/lang/Object;)Z") => {
            let s = receiver_str(receiver)?;
            let equal = matches!(args[0].as_str(), Some(other) if other == s);
            Ok(Some(Value::Int(equal as i32)))
        }
        (names::JAVA_LANG_STRING, "concat", "(Ljava/lang/String;)Ljava/lang/String;") => {
            let mut s = receiver_str(receiver)?;
            s.push_str(&str_arg(&args[0])?);
            Ok(Some(Value::string(s)))
        }
        (names::JAVA_LANG_STRING, "substring", "(II)Ljava/lang/String;") => {
            let s = receiver_str(receiver)?;
            let units: Vec<u16> = s.encode_utf16().collect();
            let from = int_arg(&args[0])?;
            let to = int_arg(&args[1])?;
            let (from_idx, to_idx) = (from.max(0) as usize, to.max(0) as usize);
            if from < 0 || to < 0 || from_idx > to_idx || to_idx > units.len() {
                return Err(SandboxError::IndexOutOfBounds {
                    index: to,
                    length: units.len(),
                });
            }
            Ok(Some(Value::string(String::from_utf16_lossy(
                &units[from_idx..to_idx],
            ))))
        }
        (names::JAVA_LANG_STRING, "valueOf", "([C)Ljava/lang/String;") => {
            let units = char_array_arg(&args[0])?;
            Ok(Some(Value::string(String::from_utf16_lossy(&units))))
        }
        (names::JAVA_LANG_STRING, "valueOf", "(C)Ljava/lang/String;") => {
            let unit = int_arg(&args[0])? as u16;
            Ok(Some(Value::string(String::from_utf16_lossy(&[unit]))))
        }
        (names::JAVA_LANG_STRING, "valueOf", "(I)Ljava/lang/String;") => {
            Ok(Some(Value::string(int_arg(&args[0])?.to_string())))
        }
        (names::JAVA_LANG_STRING, "valueOf", "(J)Ljava/lang/String;") => {
            Ok(Some(Value::string(long_arg(&args[0])?.to_string())))
        }

        // ---- java.lang.StringBuilder ----
        (names::JAVA_LANG_STRING_BUILDER, names::INIT, "()V")
        | (names::JAVA_LANG_STRING_BUILDER, names::INIT, "(I)V") => {
            construct(receiver, Obj::Builder(String::new()))
        }
        (names::JAVA_LANG_STRING_BUILDER, names::INIT, "(Ljava/lang/String;)V") => {
            let initial = str_arg(&args[0])?;
            construct(receiver, Obj::Builder(initial))
        }
        (names::JAVA_LANG_STRING_BUILDER, "append", "(C)Ljava/lang/StringBuilder;") => {
            let unit = int_arg(&args[0])? as u16;
            builder_append(receiver, &String::from_utf16_lossy(&[unit]))
        }
        (
            names::JAVA_LANG_STRING_BUILDER,
            "append",
            "(Ljava/lang/String;)Ljava/lang/StringBuilder;",
        ) => {
            let appended = match &args[0] {
                Value::Null => "null".to_owned(),
                other => str_arg(other)?,
            };
            builder_append(receiver, &appended)
        }
        (names::JAVA_LANG_STRING_BUILDER, "append", "(I)Ljava/lang/StringBuilder;") => {
            builder_append(receiver, &int_arg(&args[0])?.to_string())
        }
        (names::JAVA_LANG_STRING_BUILDER, "append", "(J)Ljava/lang/StringBuilder;") => {
            builder_append(receiver, &long_arg(&args[0])?.to_string())
        }
        (names::JAVA_LANG_STRING_BUILDER, "toString", "()Ljava/lang/String;") => {
            let obj = receiver_ref(receiver)?;
            let built = match &*obj.borrow() {
                Obj::Builder(s) => s.clone(),
                other => return Err(type_confusion_for(other)),
            };
            Ok(Some(Value::string(built)))
        }
        (names::JAVA_LANG_STRING_BUILDER, "length", "()I") => {
            let obj = receiver_ref(receiver)?;
            let length = match &*obj.borrow() {
                Obj::Builder(s) => s.encode_utf16().count(),
                other => return Err(type_confusion_for(other)),
            };
            Ok(Some(Value::Int(length as i32)))
        }

        // ---- java.lang.System ----
        (names::JAVA_LANG_SYSTEM, "arraycopy", "(Ljava/lang/Object;ILjava/lang/Object;II)V") => {
            arraycopy(&args[0], int_arg(&args[1])?, &args[2], int_arg(&args[3])?, int_arg(&args[4])?)
                .map(|_| None)
        }

        // ---- the DES suite ----
        (names::JAVAX_CRYPTO_SPEC_DES_KEY_SPEC, names::INIT, "([B)V") => {
            let material = byte_array_arg(&args[0])?;
            if material.len() < 8 {
                return Err(SandboxError::Cipher(format!(
                    "DES key material too short: {} bytes",
                    material.len()
                )));
            }
            construct(receiver, Obj::KeySpec(material[..8].to_vec()))
        }
        (names::JAVAX_CRYPTO_SPEC_IV_PARAMETER_SPEC, names::INIT, "([B)V") => {
            let iv = byte_array_arg(&args[0])?;
            construct(receiver, Obj::IvSpec(iv))
        }
        (
            names::JAVAX_CRYPTO_SECRET_KEY_FACTORY,
            "getInstance",
            "(Ljava/lang/String;)Ljavax/crypto/SecretKeyFactory;",
        ) => {
            let algorithm = str_arg(&args[0])?;
            if algorithm != "DES" {
                return Err(SandboxError::Cipher(format!(
                    "unsupported key algorithm '{}'",
                    algorithm
                )));
            }
            Ok(Some(Value::Ref(new_obj(Obj::KeyFactory(algorithm)))))
        }
        (
            names::JAVAX_CRYPTO_SECRET_KEY_FACTORY,
            "generateSecret",
            "(Ljava/security/spec/KeySpec;)Ljavax/crypto/SecretKey;",
        ) => {
            let obj = receiver_ref(receiver)?;
            match &*obj.borrow() {
                Obj::KeyFactory(_) => (),
                other => return Err(type_confusion_for(other)),
            }
            let spec = ref_arg(&args[0])?;
            let material = match &*spec.borrow() {
                Obj::KeySpec(material) => material.clone(),
                other => return Err(type_confusion_for(other)),
            };
            Ok(Some(Value::Ref(new_obj(Obj::SecretKey(material)))))
        }
        (names::JAVAX_CRYPTO_CIPHER, "getInstance", "(Ljava/lang/String;)Ljavax/crypto/Cipher;") => {
            let transformation = str_arg(&args[0])?;
            if transformation != DES_CBC_PKCS5 {
                return Err(SandboxError::Cipher(format!(
                    "unsupported transformation '{}'",
                    transformation
                )));
            }
            Ok(Some(Value::Ref(new_obj(Obj::Cipher(CipherState {
                transformation,
                mode: None,
                key: None,
                iv: None,
            })))))
        }
        (names::JAVAX_CRYPTO_CIPHER, "init", "(ILjava/security/Key;)V") => {
            cipher_init(receiver, int_arg(&args[0])?, &args[1], None)
        }
        (
            names::JAVAX_CRYPTO_CIPHER,
            "init",
            "(ILjava/security/Key;Ljava/security/spec/AlgorithmParameterSpec;)V",
        ) => cipher_init(receiver, int_arg(&args[0])?, &args[1], Some(&args[2])),
        (names::JAVAX_CRYPTO_CIPHER, "doFinal", "([B)[B") => {
            let obj = receiver_ref(receiver)?;
            let state = match &*obj.borrow() {
                Obj::Cipher(state) => state.clone(),
                other => return Err(type_confusion_for(other)),
            };
            let data = byte_array_arg(&args[0])?;
            let plain = cipher_do_final(&state, &data)?;
            Ok(Some(byte_array_value(plain)))
        }

        _ => Err(SandboxError::ForbiddenCall {
            owner: mref.owner.clone(),
            name: mref.name.clone(),
        }),
    }
}

/// Run a constructor: rewrite the blank allocation in place
fn construct(receiver: Option<&Value>, constructed: Obj) -> Result<Option<Value>, SandboxError> {
    let obj = receiver_ref(receiver)?;
    *obj.borrow_mut() = constructed;
    Ok(None)
}

fn builder_append(receiver: Option<&Value>, text: &str) -> Result<Option<Value>, SandboxError> {
    let obj = receiver_ref(receiver)?;
    match &mut *obj.borrow_mut() {
        Obj::Builder(s) => s.push_str(text),
        other => return Err(type_confusion_for(other)),
    }
    Ok(Some(Value::Ref(obj)))
}

fn cipher_init(
    receiver: Option<&Value>,
    mode: i32,
    key: &Value,
    params: Option<&Value>,
) -> Result<Option<Value>, SandboxError> {
    let key_obj = ref_arg(key)?;
    let key_material = match &*key_obj.borrow() {
        Obj::SecretKey(material) | Obj::KeySpec(material) => material.clone(),
        other => return Err(type_confusion_for(other)),
    };
    let iv = match params {
        None => None,
        Some(value) => {
            let params_obj = ref_arg(value)?;
            let iv = match &*params_obj.borrow() {
                Obj::IvSpec(iv) => iv.clone(),
                other => return Err(type_confusion_for(other)),
            };
            Some(iv)
        }
    };
    let obj = receiver_ref(receiver)?;
    match &mut *obj.borrow_mut() {
        Obj::Cipher(state) => {
            state.mode = Some(mode);
            state.key = Some(key_material);
            state.iv = iv;
        }
        other => return Err(type_confusion_for(other)),
    }
    Ok(None)
}

fn cipher_do_final(state: &CipherState, data: &[u8]) -> Result<Vec<u8>, SandboxError> {
    use des::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};

    if state.transformation != DES_CBC_PKCS5 {
        return Err(SandboxError::Cipher(format!(
            "unsupported transformation '{}'",
            state.transformation
        )));
    }
    if state.mode != Some(DECRYPT_MODE) {
        return Err(SandboxError::Cipher(
            "cipher not initialized for decryption".to_owned(),
        ));
    }
    let key = state
        .key
        .as_ref()
        .ok_or_else(|| SandboxError::Cipher("cipher has no key".to_owned()))?;
    let iv = state
        .iv
        .as_ref()
        .ok_or_else(|| SandboxError::Cipher("CBC decryption needs an IV".to_owned()))?;

    let decryptor = cbc::Decryptor::<des::Des>::new_from_slices(key, iv)
        .map_err(|e| SandboxError::Cipher(format!("bad key or IV length: {}", e)))?;
    decryptor
        .decrypt_padded_vec_mut::<Pkcs7>(data)
        .map_err(|e| SandboxError::Cipher(format!("decryption failed: {}", e)))
}

/// `System.arraycopy` over the sandbox array kinds
fn arraycopy(
    src: &Value,
    src_pos: i32,
    dst: &Value,
    dst_pos: i32,
    length: i32,
) -> Result<(), SandboxError> {
    let src_obj = ref_arg(src)?;
    let dst_obj = ref_arg(dst)?;

    fn copy_range<T: Clone>(
        src: &[T],
        src_pos: i32,
        dst: &mut Vec<T>,
        dst_pos: i32,
        length: i32,
    ) -> Result<(), SandboxError> {
        if src_pos < 0 || dst_pos < 0 || length < 0 {
            return Err(SandboxError::IndexOutOfBounds {
                index: src_pos.min(dst_pos).min(length),
                length: src.len(),
            });
        }
        let (src_pos, dst_pos, length) = (src_pos as usize, dst_pos as usize, length as usize);
        if src_pos + length > src.len() {
            return Err(SandboxError::IndexOutOfBounds {
                index: (src_pos + length) as i32,
                length: src.len(),
            });
        }
        if dst_pos + length > dst.len() {
            return Err(SandboxError::IndexOutOfBounds {
                index: (dst_pos + length) as i32,
                length: dst.len(),
            });
        }
        let copied = src[src_pos..src_pos + length].to_vec();
        dst[dst_pos..dst_pos + length].clone_from_slice(&copied);
        Ok(())
    }

    // Copying within one array would alias the RefCell, so snapshot first
    if std::rc::Rc::ptr_eq(&src_obj, &dst_obj) {
        let mut obj = src_obj.borrow_mut();
        return match &mut *obj {
            Obj::CharArray(values) => {
                let snapshot = values.clone();
                copy_range(&snapshot, src_pos, values, dst_pos, length)
            }
            Obj::ByteArray(values) => {
                let snapshot = values.clone();
                copy_range(&snapshot, src_pos, values, dst_pos, length)
            }
            Obj::IntArray(values) => {
                let snapshot = values.clone();
                copy_range(&snapshot, src_pos, values, dst_pos, length)
            }
            Obj::LongArray(values) => {
                let snapshot = values.clone();
                copy_range(&snapshot, src_pos, values, dst_pos, length)
            }
            Obj::RefArray { values, .. } => {
                let snapshot = values.clone();
                copy_range(&snapshot, src_pos, values, dst_pos, length)
            }
            other => Err(type_confusion_for(other)),
        };
    }

    let src_borrow = src_obj.borrow();
    let mut dst_borrow = dst_obj.borrow_mut();
    match (&*src_borrow, &mut *dst_borrow) {
        (Obj::CharArray(src), Obj::CharArray(dst)) => copy_range(src, src_pos, dst, dst_pos, length),
        (Obj::ByteArray(src), Obj::ByteArray(dst)) => copy_range(src, src_pos, dst, dst_pos, length),
        (Obj::ShortArray(src), Obj::ShortArray(dst)) => copy_range(src, src_pos, dst, dst_pos, length),
        (Obj::IntArray(src), Obj::IntArray(dst)) => copy_range(src, src_pos, dst, dst_pos, length),
        (Obj::LongArray(src), Obj::LongArray(dst)) => copy_range(src, src_pos, dst, dst_pos, length),
        (Obj::FloatArray(src), Obj::FloatArray(dst)) => copy_range(src, src_pos, dst, dst_pos, length),
        (Obj::DoubleArray(src), Obj::DoubleArray(dst)) => copy_range(src, src_pos, dst, dst_pos, length),
        (Obj::RefArray { values: src, .. }, Obj::RefArray { values: dst, .. }) => {
            copy_range(src, src_pos, dst, dst_pos, length)
        }
        _ => Err(SandboxError::TypeConfusion("arraycopy between mismatched arrays")),
    }
}

// ---- charset handling ----
//
// The targeted routines only ever name ISO-8859-1 (one of the three marker
// strings) and occasionally UTF-8.

fn encode_charset(s: &str, charset: &str) -> Result<Vec<u8>, SandboxError> {
    match charset {
        "ISO-8859-1" | "ISO8859_1" | "latin1" => Ok(s
            .chars()
            .map(|c| if (c as u32) <= 0xFF { c as u8 } else { b'?' })
            .collect()),
        "UTF-8" | "UTF8" => Ok(s.as_bytes().to_vec()),
        _ => Err(SandboxError::Unsupported("charset outside the whitelist")),
    }
}

fn decode_charset(bytes: &[u8], charset: &str) -> Result<String, SandboxError> {
    match charset {
        "ISO-8859-1" | "ISO8859_1" | "latin1" => {
            Ok(bytes.iter().map(|b| *b as char).collect())
        }
        "UTF-8" | "UTF8" => Ok(String::from_utf8_lossy(bytes).into_owned()),
        _ => Err(SandboxError::Unsupported("charset outside the whitelist")),
    }
}

// ---- argument extraction ----

fn type_confusion_for(obj: &Obj) -> SandboxError {
    let _ = obj;
    SandboxError::TypeConfusion("object of unexpected kind")
}

fn int_arg(value: &Value) -> Result<i32, SandboxError> {
    match value {
        Value::Int(v) => Ok(*v),
        _ => Err(SandboxError::TypeConfusion("expected an int argument")),
    }
}

fn long_arg(value: &Value) -> Result<i64, SandboxError> {
    match value {
        Value::Long(v) => Ok(*v),
        _ => Err(SandboxError::TypeConfusion("expected a long argument")),
    }
}

fn ref_arg(value: &Value) -> Result<ObjRef, SandboxError> {
    match value {
        Value::Ref(obj) => Ok(obj.clone()),
        Value::Null => Err(SandboxError::Thrown("java/lang/NullPointerException".to_owned())),
        _ => Err(SandboxError::TypeConfusion("expected a reference argument")),
    }
}

fn receiver_ref(receiver: Option<&Value>) -> Result<ObjRef, SandboxError> {
    match receiver {
        Some(value) => ref_arg(value),
        None => Err(SandboxError::TypeConfusion("missing receiver")),
    }
}

fn receiver_str(receiver: Option<&Value>) -> Result<String, SandboxError> {
    let obj = receiver_ref(receiver)?;
    let s = match &*obj.borrow() {
        Obj::Str(s) => s.clone(),
        other => return Err(type_confusion_for(other)),
    };
    Ok(s)
}

fn str_arg(value: &Value) -> Result<String, SandboxError> {
    value
        .as_str()
        .ok_or(SandboxError::TypeConfusion("expected a string argument"))
}

fn byte_array_arg(value: &Value) -> Result<Vec<u8>, SandboxError> {
    let obj = ref_arg(value)?;
    let bytes = match &*obj.borrow() {
        Obj::ByteArray(values) => values.iter().map(|b| *b as u8).collect(),
        other => return Err(type_confusion_for(other)),
    };
    Ok(bytes)
}

fn char_array_arg(value: &Value) -> Result<Vec<u16>, SandboxError> {
    let obj = ref_arg(value)?;
    let units = match &*obj.borrow() {
        Obj::CharArray(values) => values.clone(),
        other => return Err(type_confusion_for(other)),
    };
    Ok(units)
}

pub(crate) fn byte_array_value(bytes: Vec<u8>) -> Value {
    Value::Ref(new_obj(Obj::ByteArray(
        bytes.into_iter().map(|b| b as i8).collect(),
    )))
}
