use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use super::{
    analysis::compute_maxs,
    class::ClassNode,
    rules::{RuleTable, TransformRule, WhenMissing},
    TransformError,
};

/// Where rewritten classes are dumped when dumping is on.
pub const DUMP_DIR: &str = ".mlsDebugDump";

/// An injection that didn't happen.
#[derive(Debug)]
pub struct Skipped {
    pub method: &'static str,
    pub injection: Option<&'static str>,
    pub reason: TransformError,
}

/// What happened to one class.
#[derive(Debug, Default)]
pub struct TransformOutcome {
    /// `method: injection` for every injection that went in.
    pub applied: Vec<String>,
    pub skipped: Vec<Skipped>,
}

impl TransformOutcome {
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }
}

/// Writes rewritten classes to disk for inspection.
struct ClassDump {
    dir: PathBuf,
    cleared: OnceCell<()>,
    write_lock: Mutex<()>,
}

impl ClassDump {
    fn new(dir: PathBuf) -> ClassDump {
        ClassDump {
            dir,
            cleared: OnceCell::new(),
            write_lock: Mutex::new(()),
        }
    }

    fn clear(dir: &Path) {
        log::info!("Transformed class dumping is active");

        if dir.is_dir() {
            if let Err(err) = std::fs::remove_dir_all(dir) {
                log::error!("Failed to clear debug dump dir: {err}");
            }
        }
    }

    fn write(&self, name: &str, bytes: &[u8]) {
        self.cleared.get_or_init(|| ClassDump::clear(&self.dir));

        let _guard = self.write_lock.lock();
        let path = self.dir.join(format!("{name}.class"));

        let result = path
            .parent()
            .map_or(Ok(()), std::fs::create_dir_all)
            .and_then(|_| std::fs::write(&path, bytes));

        if let Err(err) = result {
            log::error!("Failed to dump class {name}: {err}");
        }
    }
}

/// Applies the rule table to classes as they are loaded.
pub struct Transformer {
    rules: RuleTable,
    dump: Option<ClassDump>,
}

impl Transformer {
    pub fn new(rules: RuleTable) -> Transformer {
        Transformer { rules, dump: None }
    }

    /// Dumps every rewritten class under `dir`. The directory is emptied before the first dump.
    pub fn with_dump_dir(mut self, dir: impl Into<PathBuf>) -> Transformer {
        self.dump = Some(ClassDump::new(dir.into()));
        self
    }

    /// Whether `class_name` is one we rewrite. Hosts use this to pick classes for
    /// retransformation.
    pub fn handles(&self, class_name: &str) -> bool {
        self.rules.contains(class_name)
    }

    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }

    /// Applies every rule for the class. Each rule either applies completely (less any
    /// injections that found nowhere to go) or leaves its method exactly as it was.
    pub fn transform(&self, class: &mut ClassNode) -> TransformOutcome {
        let mut outcome = TransformOutcome::default();

        for rule in self.rules.rules_for(&class.name) {
            if let Err(reason) = apply_rule(rule, class, &mut outcome) {
                match (&reason, rule.when_missing) {
                    (TransformError::MethodNotFound { .. }, WhenMissing::Expected(note)) => {
                        log::info!("{note}");
                    }

                    _ => log::error!(
                        "Transformer {}.{} failed: {reason}",
                        rule.class_name,
                        rule.method
                    ),
                }

                outcome.skipped.push(Skipped {
                    method: rule.method,
                    injection: None,
                    reason,
                });
            }
        }

        outcome
    }

    /// Rewrites a class file. Returns `None` if the class isn't ours to touch or couldn't be
    /// processed at all, in which case the host keeps the original bytes.
    pub fn instrument_class(&self, name: &str, bytes: &[u8]) -> Option<Vec<u8>> {
        if !self.handles(name) {
            return None;
        }

        log::info!("Transforming {name}");

        let result = ClassNode::read(bytes).and_then(|mut class| {
            let outcome = self.transform(&mut class);

            if !outcome.is_complete() {
                log::warn!(
                    "{name}: {} injection(s) applied, {} skipped",
                    outcome.applied.len(),
                    outcome.skipped.len()
                );
            }

            class.write()
        });

        let bytes = match result {
            Ok(bytes) => bytes,
            Err(err) => {
                log::error!("Completely failed to transform {name}: {err}");
                return None;
            }
        };

        if let Some(dump) = &self.dump {
            dump.write(name, &bytes);
        }

        Some(bytes)
    }
}

/// Applies one rule. Injections with no match are recorded in `outcome` and skipped. If the
/// method doesn't verify afterwards, it is restored and the error returned.
fn apply_rule(
    rule: &TransformRule,
    class: &mut ClassNode,
    outcome: &mut TransformOutcome,
) -> Result<(), TransformError> {
    let class_name = class.name.clone();

    let method = class
        .method_mut(rule.method)
        .ok_or_else(|| TransformError::MethodNotFound {
            class: class_name.clone(),
            method: rule.method.to_string(),
        })?;

    let snapshot = method.clone();
    let mut applied = vec![];
    let mut cursor = 0;

    for injection in &rule.injections {
        let Some(at) = injection.locator.find(&method.instructions, cursor) else {
            log::warn!(
                "No match for '{}' in {class_name}.{}; skipping it",
                injection.name,
                rule.method
            );

            outcome.skipped.push(Skipped {
                method: rule.method,
                injection: Some(injection.name),
                reason: TransformError::NoMatch {
                    method: rule.method.to_string(),
                    injection: injection.name,
                },
            });

            continue;
        };

        method
            .instructions
            .splice(at..at, injection.code.iter().cloned());
        cursor = at + injection.code.len();

        applied.push(format!("{}: {}", rule.method, injection.name));
    }

    if let Err(err) = compute_maxs(method) {
        *method = snapshot;

        return Err(TransformError::Verify {
            method: rule.method.to_string(),
            source: err,
        });
    }

    outcome.applied.extend(applied);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        hooks::{Hook, HOOKS_OWNER},
        transform::{
            class::{Insn, JumpOp, Label, MethodNode, Op, TryCatch, TypeOp, VarOp, ACC_PUBLIC, ACC_STATIC},
            rules::{
                FABRIC_ENTRYPOINT_UTILS, FABRIC_LOADER_IMPL, MOD_DISCOVERER,
                QUILT_ENTRYPOINT_UTILS,
            },
        },
    };

    const COLLECTION: &str = "java/util/Collection";
    const ITERATOR: &str = "java/util/Iterator";

    /// The loop over entrypoint containers, as the loader compiles it. `first` is the slot of
    /// the entrypoint name and `container` the slot of the loop variable.
    fn invoke0_body(first: u16, container: u16) -> Vec<Insn> {
        let exception = container - 3;
        let entrypoints = container - 2;
        let iterator = container - 1;

        vec![
            Insn::Label(Label(0)),
            Insn::Line(120),
            Insn::Op(Op::AconstNull),
            Insn::astore(exception),
            Insn::aload(first),
            Insn::aload(first + 1),
            Insn::invoke_static(
                "net/fabricmc/loader/impl/FabricLoaderImpl",
                "getEntrypointContainers",
                "(Ljava/lang/String;Ljava/lang/Class;)Ljava/util/Collection;",
            ),
            Insn::astore(entrypoints),
            Insn::aload(entrypoints),
            Insn::invoke_interface(COLLECTION, "iterator", "()Ljava/util/Iterator;"),
            Insn::astore(iterator),
            Insn::Label(Label(1)),
            Insn::aload(iterator),
            Insn::invoke_interface(ITERATOR, "hasNext", "()Z"),
            Insn::Jump(JumpOp::Ifeq, Label(4)),
            Insn::aload(iterator),
            Insn::invoke_interface(ITERATOR, "next", "()Ljava/lang/Object;"),
            Insn::type_insn(TypeOp::Checkcast, "net/fabricmc/loader/api/entrypoint/EntrypointContainer"),
            Insn::astore(container),
            Insn::Label(Label(2)),
            Insn::aload(first + 2),
            Insn::aload(container),
            Insn::invoke_interface(
                "net/fabricmc/loader/api/entrypoint/EntrypointContainer",
                "getEntrypoint",
                "()Ljava/lang/Object;",
            ),
            Insn::invoke_interface("java/util/function/Consumer", "accept", "(Ljava/lang/Object;)V"),
            Insn::Label(Label(3)),
            Insn::Jump(JumpOp::Goto, Label(1)),
            Insn::Label(Label(5)),
            Insn::astore(container + 1),
            Insn::aload(container + 1),
            Insn::aload(exception),
            Insn::invoke_static(
                "net/fabricmc/loader/impl/util/ExceptionUtil",
                "gatherExceptions",
                "(Ljava/lang/Throwable;Ljava/lang/Throwable;)Ljava/lang/Throwable;",
            ),
            Insn::type_insn(TypeOp::Checkcast, "java/lang/RuntimeException"),
            Insn::astore(exception),
            Insn::Jump(JumpOp::Goto, Label(1)),
            Insn::Label(Label(4)),
            Insn::aload(exception),
            Insn::Jump(JumpOp::Ifnull, Label(6)),
            Insn::aload(exception),
            Insn::Op(Op::Athrow),
            Insn::Label(Label(6)),
            Insn::Op(Op::Return),
        ]
    }

    fn invoke0(container: u16) -> MethodNode {
        let mut method = MethodNode::new(
            "invoke0",
            "(Ljava/lang/String;Ljava/lang/Class;Ljava/util/function/Consumer;)V",
            ACC_STATIC,
            invoke0_body(0, container),
        );

        method.try_catch.push(TryCatch {
            start: Label(2),
            end: Label(3),
            handler: Label(5),
            catch_type: Some("java/lang/Throwable".to_string()),
        });

        method
    }

    fn invoke() -> MethodNode {
        MethodNode::new(
            "invoke",
            "(Ljava/lang/String;Ljava/lang/Class;Ljava/util/function/Consumer;)V",
            ACC_STATIC,
            vec![
                Insn::aload(0),
                Insn::aload(1),
                Insn::aload(2),
                Insn::invoke_static(
                    FABRIC_ENTRYPOINT_UTILS,
                    "invoke0",
                    "(Ljava/lang/String;Ljava/lang/Class;Ljava/util/function/Consumer;)V",
                ),
                Insn::Op(Op::Return),
            ],
        )
    }

    fn class(name: &str, methods: Vec<MethodNode>) -> ClassNode {
        ClassNode {
            name: name.to_string(),
            super_name: Some("java/lang/Object".to_string()),
            access: ACC_PUBLIC,
            methods,
        }
    }

    fn hook_calls(method: &MethodNode) -> Vec<String> {
        method
            .instructions
            .iter()
            .filter_map(|insn| match insn {
                Insn::Invoke { owner, name, .. } if owner == HOOKS_OWNER => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    fn position(method: &MethodNode, insn: &Insn) -> usize {
        method
            .instructions
            .iter()
            .position(|candidate| candidate == insn)
            .unwrap()
    }

    #[test]
    fn fabric_entrypoint_utils_gets_all_hooks() {
        let transformer = Transformer::new(RuleTable::standard());
        let mut class = class(FABRIC_ENTRYPOINT_UTILS, vec![invoke(), invoke0(6)]);

        let outcome = transformer.transform(&mut class);
        assert!(outcome.is_complete(), "{:?}", outcome.skipped);
        assert_eq!(outcome.applied.len(), 4);

        let invoke0 = class.method("invoke0").unwrap();
        assert_eq!(
            hook_calls(invoke0),
            vec!["beginEntrypointType", "beginSingleEntrypoint", "endEntrypointType"]
        );

        // Begin type comes first of all, before the exception local is initialised.
        assert_eq!(invoke0.instructions[0], Insn::aload(0));
        assert_eq!(invoke0.instructions[2], Hook::BeginEntrypointType.invoke_insn());

        // Begin single sits right after the container store.
        let store = position(invoke0, &Insn::astore(6));
        assert_eq!(invoke0.instructions[store + 1], Insn::aload(0));

        // End type sits before the load feeding the null check.
        let end = position(invoke0, &Hook::EndEntrypointType.invoke_insn());
        assert_eq!(invoke0.instructions[end + 1], Insn::aload(3));
        assert_eq!(
            invoke0.instructions[end + 2],
            Insn::Jump(JumpOp::Ifnull, Label(6))
        );

        assert_eq!(invoke0.max_stack, 4);
        assert_eq!(invoke0.max_locals, 8);

        let invoke = class.method("invoke").unwrap();
        assert_eq!(hook_calls(invoke), vec!["maybeCloseAfter"]);
        let ret = invoke.instructions.len() - 1;
        assert_eq!(invoke.instructions[ret - 2], Insn::aload(0));
    }

    #[test]
    fn quilt_wraps_container_and_stays_balanced() {
        let transformer = Transformer::new(RuleTable::standard());
        let mut invoke_container = invoke();
        invoke_container.name = "invokeContainer".to_string();
        let mut class = class(QUILT_ENTRYPOINT_UTILS, vec![invoke_container, invoke0(7)]);

        let outcome = transformer.transform(&mut class);
        assert!(outcome.is_complete(), "{:?}", outcome.skipped);

        let invoke0 = class.method("invoke0").unwrap();
        let store = position(invoke0, &Insn::astore(7));
        assert_eq!(
            invoke0.instructions[store + 4],
            Insn::type_insn(TypeOp::New, "net/fabricmc/loader/impl/entrypoint/EntrypointContainerImpl")
        );
        assert_eq!(invoke0.max_stack, 5);
    }

    #[test]
    fn loader_impl_instance_method() {
        let transformer = Transformer::new(RuleTable::standard());

        let mut body = vec![
            Insn::aload(0),
            Insn::aload(1),
            Insn::invoke_virtual(FABRIC_LOADER_IMPL, "hasEntrypoints", "(Ljava/lang/String;)Z"),
            Insn::Jump(JumpOp::Ifne, Label(10)),
            Insn::Op(Op::Return),
            Insn::Label(Label(10)),
        ];
        body.extend(invoke0_body(1, 7));

        let method = MethodNode::new(
            "invokeEntrypoints",
            "(Ljava/lang/String;Ljava/lang/Class;Ljava/util/function/Consumer;)V",
            ACC_PUBLIC,
            body,
        );
        let mut class = class(FABRIC_LOADER_IMPL, vec![method]);

        let outcome = transformer.transform(&mut class);
        assert!(outcome.is_complete(), "{:?}", outcome.skipped);

        let method = class.method("invokeEntrypoints").unwrap();
        assert_eq!(
            hook_calls(method),
            vec![
                "maybeCloseAfter",
                "beginEntrypointType",
                "beginSingleEntrypoint",
                "endEntrypointType",
                "maybeCloseAfter",
            ]
        );

        // The early return reports too, with the name from slot 1.
        assert_eq!(method.instructions[4], Insn::aload(1));
        assert_eq!(method.instructions[6], Insn::Op(Op::Return));

        let store = position(method, &Insn::astore(7));
        assert_eq!(method.instructions[store + 1], Insn::aload(1));
        assert_eq!(method.instructions[store + 2], Insn::aload(2));
    }

    #[test]
    fn old_fabric_without_invoke_entrypoints() {
        let transformer = Transformer::new(RuleTable::standard());
        let mut class = class(FABRIC_LOADER_IMPL, vec![]);

        let outcome = transformer.transform(&mut class);
        assert_eq!(outcome.skipped.len(), 1);
        assert!(matches!(
            outcome.skipped[0].reason,
            TransformError::MethodNotFound { .. }
        ));
    }

    #[test]
    fn missing_match_skips_only_that_injection() {
        let transformer = Transformer::new(RuleTable::standard());

        // No null check after the loop, so "end entrypoint type" has nowhere to go.
        let mut method = invoke0(6);
        let tail = position(&method, &Insn::Label(Label(4)));
        method.instructions.truncate(tail + 1);
        method.instructions.push(Insn::Op(Op::Return));

        let mut class = class(FABRIC_ENTRYPOINT_UTILS, vec![invoke(), method]);
        let outcome = transformer.transform(&mut class);

        assert_eq!(outcome.skipped.len(), 1);
        assert_eq!(outcome.skipped[0].injection, Some("end entrypoint type"));
        assert!(matches!(
            outcome.skipped[0].reason,
            TransformError::NoMatch { .. }
        ));

        let invoke0 = class.method("invoke0").unwrap();
        assert_eq!(
            hook_calls(invoke0),
            vec!["beginEntrypointType", "beginSingleEntrypoint"]
        );
        assert_eq!(hook_calls(class.method("invoke").unwrap()), vec!["maybeCloseAfter"]);
    }

    #[test]
    fn failed_verification_rolls_the_method_back() {
        let transformer = Transformer::new(RuleTable::standard());

        // Without its final return the method runs off the end once patched.
        let mut method = invoke0(6);
        let original_len = method.instructions.len();
        method.instructions[original_len - 1] = Insn::Op(Op::Nop);

        let mut class = class(FABRIC_ENTRYPOINT_UTILS, vec![invoke(), method.clone()]);
        let outcome = transformer.transform(&mut class);

        assert!(outcome
            .skipped
            .iter()
            .any(|skipped| matches!(skipped.reason, TransformError::Verify { .. })));
        assert_eq!(class.method("invoke0").unwrap(), &method);

        // The other rule for the class still went in.
        assert_eq!(hook_calls(class.method("invoke").unwrap()), vec!["maybeCloseAfter"]);
    }

    #[test]
    fn builtin_discovery_leaves_the_cast_value() {
        let transformer = Transformer::new(RuleTable::standard());
        let builtin = "net/fabricmc/loader/impl/game/GameProvider$BuiltinMod";

        let method = MethodNode::new(
            "discoverMods",
            "()V",
            ACC_PUBLIC,
            vec![
                Insn::aload(0),
                Insn::type_insn(TypeOp::Checkcast, builtin),
                Insn::astore(1),
                Insn::Op(Op::Return),
            ],
        );
        let mut class = class(MOD_DISCOVERER, vec![method]);

        let outcome = transformer.transform(&mut class);
        assert!(outcome.is_complete(), "{:?}", outcome.skipped);

        let method = class.method("discoverMods").unwrap();
        assert_eq!(hook_calls(method), vec!["setTitleFromMetadata"]);
        assert_eq!(method.max_stack, 4);
        assert_eq!(method.instructions[2], Insn::Op(Op::Dup));
        assert_eq!(
            method.instructions[method.instructions.len() - 2],
            Insn::Var(VarOp::Astore, 1)
        );
    }

    #[test]
    fn bytes_in_bytes_out() {
        let dir = tempfile::tempdir().unwrap();
        let dump = dir.path().join(DUMP_DIR);
        std::fs::create_dir_all(&dump).unwrap();
        std::fs::write(dump.join("stale.class"), b"old").unwrap();

        let transformer = Transformer::new(RuleTable::standard()).with_dump_dir(&dump);
        let bytes = class(FABRIC_ENTRYPOINT_UTILS, vec![invoke(), invoke0(6)])
            .write()
            .unwrap();

        assert!(transformer.instrument_class("java/lang/String", &bytes).is_none());
        assert!(transformer
            .instrument_class(FABRIC_ENTRYPOINT_UTILS, b"not a class")
            .is_none());

        let rewritten = transformer
            .instrument_class(FABRIC_ENTRYPOINT_UTILS, &bytes)
            .unwrap();
        let class = ClassNode::read(&rewritten).unwrap();
        assert_eq!(hook_calls(class.method("invoke").unwrap()).len(), 1);

        assert!(!dump.join("stale.class").exists());
        assert_eq!(
            std::fs::read(dump.join(format!("{FABRIC_ENTRYPOINT_UTILS}.class"))).unwrap(),
            rewritten
        );
    }
}
