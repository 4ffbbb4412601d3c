use std::fmt::Display;
use thiserror::Error;

/// Boxed source error carried by [`PipelineError`]
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failures of a pipeline stage. Every variant is fatal for the stage that reports it.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Identifiers of the expression matrix and the cell or gene metadata disagree
    #[error("alignment error: {0}")]
    Alignment(String),

    /// A stage ran before the stage producing one of its inputs
    #[error("{stage} requires {missing}, which has not been computed")]
    PrecursorMissing {
        /// Stage that was invoked
        stage: &'static str,
        /// Derived field that is absent
        missing: String,
    },

    /// A parameter is out of range
    #[error("invalid {name} = {value}: {reason}")]
    Parameter {
        /// Parameter name
        name: &'static str,
        /// Offending value
        value: String,
        /// What is expected instead
        reason: String,
    },

    /// A unit of a parallel stage failed, so the whole stage was abandoned
    #[error("{stage} failed on {unit}")]
    WorkerFailure {
        /// Stage that was running
        stage: &'static str,
        /// Unit of work that failed
        unit: String,
        /// Underlying failure
        #[source]
        source: BoxError,
    },

    /// A numerical routine failed
    #[error("{stage} failed")]
    Numerical {
        /// Stage that was running
        stage: &'static str,
        /// Underlying failure
        #[source]
        source: BoxError,
    },
}

impl PipelineError {
    pub(crate) fn parameter(name: &'static str, value: impl Display, reason: impl Into<String>) -> Self {
        PipelineError::Parameter {
            name,
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn missing(stage: &'static str, missing: impl Into<String>) -> Self {
        PipelineError::PrecursorMissing {
            stage,
            missing: missing.into(),
        }
    }

    pub(crate) fn numerical(stage: &'static str, source: anyhow::Error) -> Self {
        PipelineError::Numerical {
            stage,
            source: source.into(),
        }
    }

    pub(crate) fn worker(stage: &'static str, unit: impl Into<String>, source: anyhow::Error) -> Self {
        PipelineError::WorkerFailure {
            stage,
            unit: unit.into(),
            source: source.into(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use anyhow::format_err;

    #[test]
    fn messages() {
        let e = PipelineError::parameter("resolution", -1.0, "must be positive");
        assert_eq!(e.to_string(), "invalid resolution = -1: must be positive");

        let e = PipelineError::missing("cluster_cells", "a UMAP embedding");
        assert_eq!(
            e.to_string(),
            "cluster_cells requires a UMAP embedding, which has not been computed"
        );

        let e = PipelineError::worker("graph_test", "gene G1", format_err!("boom"));
        assert_eq!(e.to_string(), "graph_test failed on gene G1");
        assert_eq!(std::error::Error::source(&e).unwrap().to_string(), "boom");
    }
}
