//! The semantic events that flow from the progress model to whatever renders it.

use std::str::FromStr;

use strum::{Display, EnumString, IntoStaticStr};

use super::ProgressError;

/// A change to a custom progress bar. These are the operations that mods can perform through
/// the API once they have created a bar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CustomOp {
    /// Moves the bar to a new value. The model clamps this into the bar's bounds.
    Progress(i32),
    Minimum(i32),
    Maximum(i32),
    Title(String),
    Indeterminate(bool),

    /// Removes the bar from the overlay.
    Close,
}

/// The name of a custom bar operation, as it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, IntoStaticStr, Display)]
#[strum(serialize_all = "lowercase")]
pub enum CustomOpKind {
    Progress,
    Minimum,
    Maximum,
    Title,
    Indeterminate,
    Close,
}

impl CustomOp {
    pub fn kind(&self) -> CustomOpKind {
        match self {
            CustomOp::Progress(_) => CustomOpKind::Progress,
            CustomOp::Minimum(_) => CustomOpKind::Minimum,
            CustomOp::Maximum(_) => CustomOpKind::Maximum,
            CustomOp::Title(_) => CustomOpKind::Title,
            CustomOp::Indeterminate(_) => CustomOpKind::Indeterminate,
            CustomOp::Close => CustomOpKind::Close,
        }
    }

    /// Builds an operation from its name and string arguments. This is how operations arrive
    /// over IPC and through the string-based entry point of the model.
    pub fn parse(name: &str, args: &[String]) -> Result<CustomOp, ProgressError> {
        let kind = CustomOpKind::from_str(name)
            .map_err(|_| ProgressError::UnknownOperation(name.to_string()))?;

        if kind == CustomOpKind::Close {
            return Ok(CustomOp::Close);
        }

        let arg = args.first().ok_or_else(|| ProgressError::InvalidArgument {
            op: name.to_string(),
            value: String::new(),
        })?;

        let invalid = || ProgressError::InvalidArgument {
            op: name.to_string(),
            value: arg.clone(),
        };

        Ok(match kind {
            CustomOpKind::Progress => CustomOp::Progress(arg.parse().map_err(|_| invalid())?),
            CustomOpKind::Minimum => CustomOp::Minimum(arg.parse().map_err(|_| invalid())?),
            CustomOpKind::Maximum => CustomOp::Maximum(arg.parse().map_err(|_| invalid())?),
            CustomOpKind::Title => CustomOp::Title(arg.clone()),
            CustomOpKind::Indeterminate => {
                // Lenient like the loader's own boolean properties: anything but "true" is false.
                CustomOp::Indeterminate(arg.eq_ignore_ascii_case("true"))
            }
            CustomOpKind::Close => CustomOp::Close,
        })
    }

    /// The string arguments that follow the operation name on the wire.
    pub fn args(&self) -> Vec<String> {
        match self {
            CustomOp::Progress(value) | CustomOp::Minimum(value) | CustomOp::Maximum(value) => {
                vec![value.to_string()]
            }
            CustomOp::Title(title) => vec![title.clone()],
            CustomOp::Indeterminate(on) => vec![on.to_string()],
            CustomOp::Close => vec![],
        }
    }
}

/// Everything the overlay needs to hear about. Each variant corresponds to exactly one
/// operation of the model and to exactly one IPC message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    BeginEntrypointType {
        name: String,
        type_name: String,
        count: i32,
    },

    BeginSingleEntrypoint {
        type_name: String,
        type_type: String,
        unit_id: String,
        unit_name: String,
    },

    EndEntrypointType {
        name: String,
    },

    /// A memory sample in bytes.
    MemoryUsage {
        usage: u64,
        total: u64,
    },

    CreateCustomBar {
        id: String,
        title: String,
        max: i32,
    },

    CustomBarOp {
        id: String,
        op: CustomOp,
    },

    SetTitle(String),

    /// The overlay is going away. Nothing is sent after this.
    Shutdown,
}
