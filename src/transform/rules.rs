//! The fixed table of loader methods we patch and what goes into them.

use std::collections::HashMap;

use super::{
    class::{Insn, JumpOp, Op, TypeOp, VarOp},
    locator::{
        load, Injection, InjectionSpec, LocalRole, Locator, Matcher, Piece, Slot, SlotTable,
    },
};
use crate::{hooks::Hook, host::LoaderVariant};

pub const FABRIC_LOADER_IMPL: &str = "net/fabricmc/loader/impl/FabricLoaderImpl";
pub const FABRIC_ENTRYPOINT_UTILS: &str = "net/fabricmc/loader/impl/entrypoint/EntrypointUtils";
pub const QUILT_ENTRYPOINT_UTILS: &str = "org/quiltmc/loader/impl/entrypoint/EntrypointUtils";
pub const MOD_DISCOVERER: &str = "net/fabricmc/loader/impl/discovery/ModDiscoverer";
pub const MOD_RESOLVER: &str = "org/quiltmc/loader/impl/discovery/ModResolver";
pub const STANDARD_QUILT_PLUGIN: &str = "org/quiltmc/loader/impl/plugin/quilt/StandardQuiltPlugin";

const ENTRYPOINT_CONTAINER: &str = "net/fabricmc/loader/api/entrypoint/EntrypointContainer";
const ENTRYPOINT_CONTAINER_IMPL: &str = "net/fabricmc/loader/impl/entrypoint/EntrypointContainerImpl";
const QUILT_ENTRYPOINT_CONTAINER: &str = "org/quiltmc/loader/api/entrypoint/EntrypointContainer";
const MOD_CONTAINER: &str = "net/fabricmc/loader/api/ModContainer";
const MOD_METADATA: &str = "net/fabricmc/loader/api/metadata/ModMetadata";
const FABRIC_BUILTIN_MOD: &str = "net/fabricmc/loader/impl/game/GameProvider$BuiltinMod";
const QUILT_BUILTIN_MOD: &str = "org/quiltmc/loader/impl/game/GameProvider$BuiltinMod";
const FABRIC_VERSION: &str = "net/fabricmc/loader/api/Version";
const INTERNAL_MOD_METADATA: &str = "org/quiltmc/loader/impl/metadata/qmj/InternalModMetadata";
const QUILT_VERSION: &str = "org/quiltmc/loader/api/Version";

const GET_STRING: &str = "()Ljava/lang/String;";

/// How to react when a rule's target method isn't in the class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhenMissing {
    /// Some loader versions simply don't have it. Logged at info level with the given note.
    Expected(&'static str),

    /// Something is off. Logged as a warning.
    Anomaly,
}

/// The injections for one method of one class.
#[derive(Debug, Clone)]
pub struct TransformRule {
    pub class_name: &'static str,
    pub method: &'static str,
    pub injections: Vec<Injection>,
    pub when_missing: WhenMissing,
}

impl TransformRule {
    /// Resolves `specs` against `slots` so the rule is ready to apply.
    pub fn new(
        class_name: &'static str,
        method: &'static str,
        slots: SlotTable,
        specs: &[InjectionSpec],
    ) -> TransformRule {
        TransformRule {
            class_name,
            method,
            injections: specs.iter().map(|spec| spec.resolve(&slots)).collect(),
            when_missing: WhenMissing::Anomaly,
        }
    }

    pub fn expect_missing(mut self, note: &'static str) -> TransformRule {
        self.when_missing = WhenMissing::Expected(note);
        self
    }
}

/// Every rule, keyed by the class it applies to.
#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    rules: HashMap<&'static str, Vec<TransformRule>>,
}

impl RuleTable {
    pub fn new() -> RuleTable {
        RuleTable::default()
    }

    pub fn register(&mut self, rule: TransformRule) {
        self.rules.entry(rule.class_name).or_default().push(rule);
    }

    pub fn rules_for(&self, class_name: &str) -> &[TransformRule] {
        self.rules
            .get(class_name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn contains(&self, class_name: &str) -> bool {
        self.rules.contains_key(class_name)
    }

    pub fn class_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.rules.keys().copied()
    }

    /// The rules for both loaders. Classes of the other loader simply never turn up.
    pub fn standard() -> RuleTable {
        let mut table = RuleTable::new();

        for variant in [LoaderVariant::Fabric, LoaderVariant::Quilt] {
            let (utils, exit_method) = match variant {
                LoaderVariant::Fabric => (FABRIC_ENTRYPOINT_UTILS, "invoke"),
                LoaderVariant::Quilt => (QUILT_ENTRYPOINT_UTILS, "invokeContainer"),
            };

            table.register(TransformRule::new(
                utils,
                exit_method,
                SlotTable::invocation(container_slot(variant), false),
                &[maybe_close_after()],
            ));

            table.register(TransformRule::new(
                utils,
                "invoke0",
                SlotTable::invocation(container_slot(variant), false),
                &invocation_hooks(variant, Locator::AtCursor),
            ));
        }

        let mut loader_impl = vec![maybe_close_after()];
        loader_impl.extend(invocation_hooks(
            LoaderVariant::Fabric,
            Locator::Before(Matcher::Op(Op::AconstNull)),
        ));
        loader_impl.push(maybe_close_after());

        table.register(
            TransformRule::new(
                FABRIC_LOADER_IMPL,
                "invokeEntrypoints",
                SlotTable::invocation(container_slot(LoaderVariant::Fabric), true),
                &loader_impl,
            )
            .expect_missing(
                "New-style FabricLoaderImpl.invokeEntrypoints not found. Assuming old Fabric.",
            ),
        );

        table.register(TransformRule::new(
            MOD_DISCOVERER,
            "discoverMods",
            SlotTable::none(),
            &[builtin_title(FABRIC_BUILTIN_MOD, MetadataAccess::fabric())],
        ));

        table.register(TransformRule::new(
            MOD_RESOLVER,
            "resolve",
            SlotTable::none(),
            &[builtin_title(QUILT_BUILTIN_MOD, MetadataAccess::fabric())],
        ));

        table.register(TransformRule::new(
            STANDARD_QUILT_PLUGIN,
            "addBuiltinMods",
            SlotTable::none(),
            &[builtin_title(QUILT_BUILTIN_MOD, MetadataAccess::quilt())],
        ));

        table
    }
}

/// The local holding the current container inside the static `invoke0`.
fn container_slot(variant: LoaderVariant) -> u16 {
    match variant {
        LoaderVariant::Fabric => 6,
        LoaderVariant::Quilt => 7,
    }
}

/// Reports the entrypoint name to the teardown policy just before the method returns.
fn maybe_close_after() -> InjectionSpec {
    InjectionSpec::new(
        "maybe close after",
        Locator::Before(Matcher::Op(Op::Return)),
        vec![
            load(LocalRole::EntrypointName),
            Hook::MaybeCloseAfter.invoke_insn().into(),
        ],
    )
}

/// The three hooks around the loop over entrypoint containers.
fn invocation_hooks(variant: LoaderVariant, begin_at: Locator) -> Vec<InjectionSpec> {
    let begin_type = InjectionSpec::new(
        "begin entrypoint type",
        begin_at,
        vec![
            load(LocalRole::EntrypointName),
            load(LocalRole::EntrypointType),
            Hook::BeginEntrypointType.invoke_insn().into(),
        ],
    );

    let mut single = vec![
        load(LocalRole::EntrypointName),
        load(LocalRole::EntrypointType),
        Insn::invoke_virtual("java/lang/Class", "getSimpleName", GET_STRING).into(),
    ];

    // Quilt's containers are its own type; wrap them in the Fabric-facing one first.
    if variant.is_quilt() {
        single.push(Insn::type_insn(TypeOp::New, ENTRYPOINT_CONTAINER_IMPL).into());
        single.push(Insn::Op(Op::Dup).into());
    }

    single.push(load(LocalRole::Container));

    if variant.is_quilt() {
        single.push(
            Insn::invoke_special(
                ENTRYPOINT_CONTAINER_IMPL,
                "<init>",
                &format!("(L{QUILT_ENTRYPOINT_CONTAINER};)V"),
            )
            .into(),
        );
    }

    single.extend(
        [
            Insn::invoke_interface(
                ENTRYPOINT_CONTAINER,
                "getProvider",
                &format!("()L{MOD_CONTAINER};"),
            ),
            Insn::invoke_interface(MOD_CONTAINER, "getMetadata", &format!("()L{MOD_METADATA};")),
            Insn::Op(Op::Dup),
            Insn::invoke_interface(MOD_METADATA, "getId", GET_STRING),
            Insn::Op(Op::Swap),
            Insn::invoke_interface(MOD_METADATA, "getName", GET_STRING),
            Hook::BeginSingleEntrypoint.invoke_insn(),
        ]
        .map(Piece::from),
    );

    let begin_single = InjectionSpec::new(
        "begin single entrypoint",
        Locator::After(Matcher::Store {
            op: VarOp::Astore,
            slot: Slot::Role(LocalRole::Container),
        }),
        single,
    );

    // The loop is followed by `if (exception != null) throw exception;`.
    let end_type = InjectionSpec::new(
        "end entrypoint type",
        Locator::BeforeLeading(Matcher::Jump(JumpOp::Ifnull), 1),
        vec![
            load(LocalRole::EntrypointName),
            Hook::EndEntrypointType.invoke_insn().into(),
        ],
    );

    vec![begin_type, begin_single, end_type]
}

/// How to get id, name and version out of a builtin mod's metadata.
struct MetadataAccess {
    metadata: &'static str,
    id: &'static str,
    name: &'static str,
    version_getter: &'static str,
    version: &'static str,
    version_string: &'static str,
}

impl MetadataAccess {
    fn fabric() -> MetadataAccess {
        MetadataAccess {
            metadata: MOD_METADATA,
            id: "getId",
            name: "getName",
            version_getter: "getVersion",
            version: FABRIC_VERSION,
            version_string: "getFriendlyString",
        }
    }

    fn quilt() -> MetadataAccess {
        MetadataAccess {
            metadata: INTERNAL_MOD_METADATA,
            id: "id",
            name: "name",
            version_getter: "version",
            version: QUILT_VERSION,
            version_string: "raw",
        }
    }
}

/// Sets the window title from the first builtin mod, right after it's cast out of the list.
/// The cast value is left on the stack as it was found.
fn builtin_title(builtin_mod: &'static str, access: MetadataAccess) -> InjectionSpec {
    let metadata = access.metadata;

    let code = [
        // BuiltinMod
        Insn::Op(Op::Dup),
        Insn::get_field(builtin_mod, "metadata", &format!("L{metadata};")),
        // BuiltinMod Metadata
        Insn::Op(Op::Dup),
        Insn::invoke_interface(metadata, access.id, GET_STRING),
        Insn::Op(Op::Swap),
        // BuiltinMod String Metadata
        Insn::Op(Op::Dup),
        Insn::invoke_interface(metadata, access.name, GET_STRING),
        Insn::Op(Op::Swap),
        // BuiltinMod String String Metadata
        Insn::invoke_interface(
            metadata,
            access.version_getter,
            &format!("()L{};", access.version),
        ),
        Insn::invoke_interface(access.version, access.version_string, GET_STRING),
        // BuiltinMod String String String
        Hook::SetTitleFromMetadata.invoke_insn(),
    ];

    InjectionSpec::new(
        "set title from builtin metadata",
        Locator::After(Matcher::TypeCheck {
            op: TypeOp::Checkcast,
            class: builtin_mod.to_string(),
        }),
        code.map(Piece::from).to_vec(),
    )
}
