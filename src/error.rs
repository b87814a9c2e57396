use std::io;
use std::path::PathBuf;

use color_eyre::eyre;
use strum::Display;

use crate::coerce::CoercionError;
use crate::pipeline::Stage;

/// The broad category a [`Failure`] is reported under.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum FailureKind {
    #[strum(to_string = "Input validation")]
    InputValidation,
    #[strum(to_string = "Resolution")]
    Resolution,
    #[strum(to_string = "Coercion")]
    Coercion,
    #[strum(to_string = "Invocation")]
    Invocation,
}

/// Every way a run can end without a result. Each one is terminal.
#[derive(Debug, thiserror::Error)]
pub enum Failure {
    #[error("cannot read descriptor file {}: {error}", path.display())]
    DescriptorIo { path: PathBuf, error: io::Error },

    #[error("descriptor file has {found} field lines, expected at least 4")]
    DescriptorTooShort { found: usize },

    #[error("archive {} does not exist", .0.display())]
    ArchiveNotFound(PathBuf),

    #[error("archive {} is not a readable jar: {reason}", path.display())]
    ArchiveUnreadable { path: PathBuf, reason: String },

    #[error("type {0} was not found")]
    TypeNotFound(String),

    #[error("type {name} could not be loaded: {reason}")]
    TypeLoad { name: String, reason: String },

    #[error("no public method {signature}")]
    MethodNotFound { signature: String },

    #[error("cannot construct an instance of {type_name}: {reason}")]
    InstanceConstruction { type_name: String, reason: String },

    #[error(
        "The number of method arguments and parameters are not matched \
         (expected {expected}, found {found})"
    )]
    ArgumentCountMismatch { expected: usize, found: usize },

    #[error("argument {position} (\"{literal}\") is not a valid {target}: {reason}")]
    Coercion {
        position: usize,
        literal: String,
        target: String,
        reason: CoercionError,
    },

    #[error("{0}")]
    Invocation(String),
}

impl Failure {
    pub fn kind(&self) -> FailureKind {
        match self {
            Failure::DescriptorIo { .. }
            | Failure::DescriptorTooShort { .. }
            | Failure::ArgumentCountMismatch { .. } => FailureKind::InputValidation,
            Failure::ArchiveNotFound(_)
            | Failure::ArchiveUnreadable { .. }
            | Failure::TypeNotFound(_)
            | Failure::TypeLoad { .. }
            | Failure::MethodNotFound { .. }
            | Failure::InstanceConstruction { .. } => FailureKind::Resolution,
            Failure::Coercion { .. } => FailureKind::Coercion,
            Failure::Invocation(_) => FailureKind::Invocation,
        }
    }

    /// The stage that was being attempted when the run failed.
    pub fn stage(&self) -> Stage {
        match self.kind() {
            FailureKind::InputValidation => match self {
                Failure::ArgumentCountMismatch { .. } => Stage::ArgsCoerced,
                _ => Stage::DescriptorRead,
            },
            FailureKind::Resolution => Stage::Resolved,
            FailureKind::Coercion => Stage::ArgsCoerced,
            FailureKind::Invocation => Stage::Invoked,
        }
    }

    /// The single line printed for a failed run.
    pub fn summary(&self) -> String {
        format!("{} failure while {}: {self}", self.kind(), self.stage())
    }
}

/// Flattens an error chain into one line, outermost context first.
pub fn describe(report: &eyre::Report) -> String {
    report
        .chain()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(": ")
}

#[cfg(test)]
mod tests {
    use color_eyre::eyre::{eyre, WrapErr};

    use super::*;

    #[test]
    fn summaries_name_kind_and_stage() {
        let failure = Failure::TypeNotFound("demo.Missing".to_owned());
        insta::assert_snapshot!(
            failure.summary(),
            @"Resolution failure while resolving the method: type demo.Missing was not found"
        );

        let failure = Failure::ArgumentCountMismatch {
            expected: 2,
            found: 1,
        };
        insta::assert_snapshot!(
            failure.summary(),
            @"Input validation failure while coercing arguments: The number of method arguments and parameters are not matched (expected 2, found 1)"
        );
    }

    #[test]
    fn describe_joins_the_chain() {
        let report = Err::<(), _>(eyre!("unsupported instruction"))
            .wrap_err("in demo.Calculator.run()V")
            .unwrap_err();
        assert_eq!(
            describe(&report),
            "in demo.Calculator.run()V: unsupported instruction"
        );
    }
}
