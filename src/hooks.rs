//! The static methods that injected code calls. The host binds every method of
//! [`HOOKS_OWNER`] to [`dispatch`], which forwards to the process-wide loading screen.

use std::str::FromStr;

use strum::{EnumIter, EnumString, IntoStaticStr};
use thiserror::Error;

use crate::{context, progress::LoadingScreen, transform::class::Insn};

/// The class that owns the hook methods.
pub const HOOKS_OWNER: &str = "mls/LoadingScreenHooks";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, IntoStaticStr, EnumIter)]
#[strum(serialize_all = "camelCase")]
pub enum Hook {
    BeginEntrypointType,
    BeginSingleEntrypoint,
    EndEntrypointType,
    MaybeCloseAfter,
    SetTitleFromMetadata,
}

impl Hook {
    pub fn name(self) -> &'static str {
        self.into()
    }

    pub fn descriptor(self) -> &'static str {
        match self {
            Hook::BeginEntrypointType => "(Ljava/lang/String;Ljava/lang/Class;)V",
            Hook::BeginSingleEntrypoint => {
                "(Ljava/lang/String;Ljava/lang/String;Ljava/lang/String;Ljava/lang/String;)V"
            }
            Hook::EndEntrypointType | Hook::MaybeCloseAfter => "(Ljava/lang/String;)V",
            Hook::SetTitleFromMetadata => "(Ljava/lang/String;Ljava/lang/String;Ljava/lang/String;)V",
        }
    }

    /// The instruction that calls this hook.
    pub fn invoke_insn(self) -> Insn {
        Insn::invoke_static(HOOKS_OWNER, self.name(), self.descriptor())
    }
}

/// A value passed from injected code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostValue {
    Str(String),

    /// A `java.lang.Class`, by binary name.
    Class { name: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HookError {
    #[error("no hook named '{0}'")]
    UnknownHook(String),

    #[error("hook '{hook}' expects {expected}")]
    BadArguments {
        hook: &'static str,
        expected: &'static str,
    },
}

/// The part of a binary class name after the package and any enclosing classes.
pub fn simple_class_name(name: &str) -> &str {
    name
        .rsplit(|c| matches!(c, '.' | '/' | '$'))
        .next()
        .unwrap_or(name)
}

/// Entry point for the host's native binding. Calls made before the loading screen exists are
/// dropped.
pub fn dispatch(name: &str, args: &[HostValue]) -> Result<(), HookError> {
    let hook = Hook::from_str(name).map_err(|_| HookError::UnknownHook(name.to_string()))?;

    match context::get() {
        Some(screen) => call(&screen, hook, args),
        None => {
            log::debug!("Ignoring {name} before startup");
            Ok(())
        }
    }
}

/// Runs `hook` against a specific screen.
pub fn call(screen: &LoadingScreen, hook: Hook, args: &[HostValue]) -> Result<(), HookError> {
    let bad = || HookError::BadArguments {
        hook: hook.name(),
        expected: hook.descriptor(),
    };

    let string = |index: usize| match args.get(index) {
        Some(HostValue::Str(value)) => Ok(value.as_str()),
        _ => Err(bad()),
    };

    let arity = match hook {
        Hook::BeginEntrypointType => 2,
        Hook::BeginSingleEntrypoint => 4,
        Hook::EndEntrypointType | Hook::MaybeCloseAfter => 1,
        Hook::SetTitleFromMetadata => 3,
    };

    if args.len() != arity {
        return Err(bad());
    }

    match hook {
        Hook::BeginEntrypointType => {
            let class = match &args[1] {
                HostValue::Class { name } => name.as_str(),
                _ => return Err(bad()),
            };

            screen.begin_entrypoint_type_for_class(string(0)?, class);
        }

        Hook::BeginSingleEntrypoint => {
            screen.begin_single_entrypoint(string(0)?, string(1)?, string(2)?, string(3)?)
        }

        Hook::EndEntrypointType => screen.end_entrypoint_type(string(0)?),

        Hook::MaybeCloseAfter => {
            screen.maybe_close_after(string(0)?);
        }

        Hook::SetTitleFromMetadata => {
            screen.set_title_from_metadata(string(0)?, string(1)?, string(2)?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Role,
        host::testing::FakeHost,
        progress::{testing::RecordingSink, DisconnectAction},
    };
    use std::sync::Arc;
    use strum::IntoEnumIterator;

    fn str(value: &str) -> HostValue {
        HostValue::Str(value.to_string())
    }

    #[test]
    fn hook_names_are_camel_case() {
        assert_eq!(Hook::BeginSingleEntrypoint.name(), "beginSingleEntrypoint");
        assert_eq!(Hook::from_str("maybeCloseAfter").unwrap(), Hook::MaybeCloseAfter);

        for hook in Hook::iter() {
            assert!(matches!(
                hook.invoke_insn(),
                Insn::Invoke { ref owner, .. } if owner == HOOKS_OWNER
            ));
        }
    }

    #[test]
    fn simple_names() {
        assert_eq!(simple_class_name("net.fabricmc.api.ModInitializer"), "ModInitializer");
        assert_eq!(simple_class_name("a/b/Outer$Inner"), "Inner");
        assert_eq!(simple_class_name("Plain"), "Plain");
    }

    #[test]
    fn calls_reach_the_model() {
        let host = FakeHost::fabric();
        host.set_count("main", 2);

        let screen = LoadingScreen::new(Role::Embedded, Arc::new(host))
            .with_disconnect_action(DisconnectAction::Teardown);
        assert!(screen.attach(Box::new(RecordingSink::new())));

        call(
            &screen,
            Hook::BeginEntrypointType,
            &[
                str("main"),
                HostValue::Class {
                    name: "net.fabricmc.api.ModInitializer".to_string(),
                },
            ],
        )
        .unwrap();
        call(
            &screen,
            Hook::BeginSingleEntrypoint,
            &[str("main"), str("ModInitializer"), str("sodium"), str("Sodium")],
        )
        .unwrap();

        assert_eq!(screen.progress("entrypoint:main"), Some(1));
        assert_eq!(screen.bar("entrypoint:main").unwrap().maximum(), 2);

        call(&screen, Hook::EndEntrypointType, &[str("main")]).unwrap();
        call(&screen, Hook::MaybeCloseAfter, &[str("client")]).unwrap();
        assert!(!screen.is_open());
    }

    #[test]
    fn bad_arguments_are_rejected() {
        let screen = LoadingScreen::new(Role::Embedded, Arc::new(FakeHost::fabric()));

        assert!(call(&screen, Hook::EndEntrypointType, &[]).is_err());

        let class = HostValue::Class {
            name: "java.lang.String".to_string(),
        };
        assert!(call(&screen, Hook::EndEntrypointType, &[class]).is_err());
        assert!(call(
            &screen,
            Hook::BeginEntrypointType,
            &[str("main"), str("not a class")]
        )
        .is_err());

        assert_eq!(
            dispatch("explode", &[]),
            Err(HookError::UnknownHook("explode".to_string()))
        );
    }
}
