//! Static analysis and deobfuscation of JVM class archives
//!
//! The engine targets the string-encryption scheme of one fixed commercial
//! obfuscator: a pattern scanner recognizes the exact instruction shapes it
//! emits ([`zkm::pattern`]), a reducer builds a minimal executable copy of
//! each affected class ([`zkm::reduce`]), and a sandboxed interpreter
//! ([`interp`]) runs the program's own decryption routine to recover each
//! hidden string - without ever granting the untrusted code a host
//! capability. Recovered constants are spliced back into the mutable class
//! models, which flow between an archive store and a sequential transform
//! pipeline.
//!
//! Execution-free cleanup passes (renaming, parameter-name synthesis,
//! signature sanitation, diagnostics) live in [`transforms`] and share the
//! same pipeline contract.
//!
//! ### Example
//!
//! ```
//! use unshade::jvm::code::{ConstValue, Instruction, StackOp};
//! use unshade::jvm::model::{ClassModel, MethodModel};
//! use unshade::jvm::{ClassAccessFlags, MethodAccessFlags};
//! use unshade::pipeline::Pipeline;
//! use unshade::table::ClassTable;
//! use unshade::transforms::{Analyze, GuessParameterNames, SanitizeSignatures};
//!
//! // One class, as an archive store would hand it over
//! let mut class = ClassModel::new("app/Main", ClassAccessFlags::PUBLIC);
//! class.generic_signature = Some(String::from("corrupted signature"));
//! let mut method =
//!     MethodModel::new("greet", "(Ljava/lang/String;)V", MethodAccessFlags::STATIC);
//! method.instructions = vec![
//!     Instruction::Const(ConstValue::Str(String::from("hello"))),
//!     Instruction::Stack(StackOp::Pop),
//!     Instruction::Return(None),
//! ];
//! class.add_method(method);
//!
//! let mut table = ClassTable::from_classes(vec![class]);
//! let mut pipeline = Pipeline::new();
//! pipeline.push(SanitizeSignatures::new());
//! pipeline.push(GuessParameterNames::new());
//! pipeline.push(Analyze::new());
//! assert!(pipeline.run(&mut table, false));
//!
//! let class = table.get("app/Main").unwrap();
//! assert_eq!(class.generic_signature, None);
//! assert_eq!(class.methods[0].parameters.as_ref().unwrap()[0].name, "string");
//! ```

pub mod archive;
pub mod decompiler;
pub mod interp;
pub mod jvm;
pub mod pipeline;
pub mod table;
pub mod transforms;
pub mod zkm;
