//! Quilt loaders before 0.21.0-beta.4 let their own entrypoint exception escape instead of the
//! Fabric one callers expect. This rewraps it.

use crate::host::{EntrypointContainer, Host, InvokeError};

const QUILT_ENTRYPOINT_EXCEPTION: &str = "org.quiltmc.loader.api.entrypoint.EntrypointException";

/// Converts Quilt's entrypoint exception, or anything deriving from it, into the canonical
/// shape. Errors whose key can't be recovered are passed through untouched.
pub fn normalize(err: InvokeError) -> InvokeError {
    match err {
        InvokeError::Foreign {
            class_chain,
            key: Some(key),
            message,
        } if class_chain.iter().any(|class| class == QUILT_ENTRYPOINT_EXCEPTION) => {
            InvokeError::Entrypoint {
                key: key.clone(),
                source: Box::new(InvokeError::Foreign {
                    class_chain,
                    key: Some(key),
                    message,
                }),
            }
        }

        other => other,
    }
}

/// Runs every implementation of entrypoint `name` through `invoker`. Progress shows up on the
/// loading screen when the host's invocation routine has been instrumented.
pub fn invoke_entrypoint(
    host: &dyn Host,
    name: &str,
    type_name: &str,
    mut invoker: impl FnMut(&EntrypointContainer) -> eyre::Result<()>,
) -> Result<(), InvokeError> {
    host.invoke_entrypoints(name, type_name, &mut invoker)
        .map_err(normalize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{
        testing::{EntrypointContainerSpec, FakeHost},
        UnitMetadata,
    };

    fn quilt_error(key: Option<&str>) -> InvokeError {
        InvokeError::Foreign {
            class_chain: vec![
                "org.quiltmc.loader.impl.entrypoint.SubEntrypointException".to_string(),
                QUILT_ENTRYPOINT_EXCEPTION.to_string(),
                "java.lang.RuntimeException".to_string(),
            ],
            key: key.map(str::to_string),
            message: "boom".to_string(),
        }
    }

    #[test]
    fn quilt_exception_is_rewrapped() {
        let err = normalize(quilt_error(Some("main")));

        let InvokeError::Entrypoint { key, source } = err else {
            panic!("expected canonical error");
        };
        assert_eq!(key, "main");
        assert_eq!(source.to_string(), "boom");
    }

    #[test]
    fn other_errors_pass_through() {
        assert!(matches!(
            normalize(quilt_error(None)),
            InvokeError::Foreign { key: None, .. }
        ));

        let unrelated = InvokeError::Foreign {
            class_chain: vec!["java.lang.IllegalStateException".to_string()],
            key: Some("main".to_string()),
            message: "nope".to_string(),
        };
        assert!(matches!(normalize(unrelated), InvokeError::Foreign { .. }));
    }

    #[test]
    fn invokes_each_implementation() {
        let host = FakeHost {
            implementations: vec![
                EntrypointContainerSpec {
                    name: "main".to_string(),
                    unit: UnitMetadata::new("a", "A", "1.0"),
                    value: 1,
                },
                EntrypointContainerSpec {
                    name: "main".to_string(),
                    unit: UnitMetadata::new("b", "B", "1.0"),
                    value: 2,
                },
                EntrypointContainerSpec {
                    name: "client".to_string(),
                    unit: UnitMetadata::new("c", "C", "1.0"),
                    value: 3,
                },
            ],
            ..FakeHost::fabric()
        };

        let mut seen = vec![];
        invoke_entrypoint(&host, "main", "ModInitializer", |container| {
            let value = container
                .entrypoint
                .downcast_ref::<i32>()
                .copied()
                .unwrap_or_default();
            seen.push((container.provider.id.clone(), value));
            Ok(())
        })
        .unwrap();

        assert_eq!(seen, vec![("a".to_string(), 1), ("b".to_string(), 2)]);
    }

    #[test]
    fn host_failures_are_normalized() {
        let host = FakeHost::quilt();
        *host.failure.lock() = Some(quilt_error(Some("client")));

        let err = invoke_entrypoint(&host, "client", "ClientModInitializer", |_| Ok(())).unwrap_err();
        assert!(matches!(err, InvokeError::Entrypoint { ref key, .. } if key == "client"));
    }
}
