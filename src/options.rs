use crate::diagnostics::DiagnosticLevel;
use crate::env::env_flag;

/// Options that control checking and logging during graph inference.
///
/// The defaults perform no extra checks and report no diagnostics. Use
/// [`InferOptions::from_env`] to configure these from environment variables.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InferOptions {
    diagnostics: DiagnosticLevel,
    check_descriptors: bool,
    check_outputs: bool,
}

impl InferOptions {
    /// Read options from the environment.
    ///
    /// - `OPSHAPE_DIAGNOSTICS` sets the diagnostic level (`off`, `warn` or
    ///   `info`).
    /// - `OPSHAPE_CHECK_DESCRIPTORS` enables checking of input descriptors.
    /// - `OPSHAPE_CHECK_OUTPUTS` enables checking of rule outputs.
    pub fn from_env() -> Self {
        let diagnostics = match std::env::var("OPSHAPE_DIAGNOSTICS") {
            Ok(level) => DiagnosticLevel::parse(&level).unwrap_or_else(|| {
                tracing::warn!(level = %level, "unrecognized diagnostic level");
                DiagnosticLevel::Off
            }),
            Err(_) => DiagnosticLevel::Off,
        };
        InferOptions {
            diagnostics,
            check_descriptors: env_flag("OPSHAPE_CHECK_DESCRIPTORS", false),
            check_outputs: env_flag("OPSHAPE_CHECK_OUTPUTS", false),
        }
    }

    /// Set the level of diagnostics reported for each node.
    pub fn with_diagnostics(mut self, level: DiagnosticLevel) -> Self {
        self.diagnostics = level;
        self
    }

    /// Set whether the invariants of each node's input descriptors are
    /// verified before its rule runs.
    pub fn with_check_descriptors(mut self, enable: bool) -> Self {
        self.check_descriptors = enable;
        self
    }

    /// Set whether the descriptors produced by each rule are verified.
    pub fn with_check_outputs(mut self, enable: bool) -> Self {
        self.check_outputs = enable;
        self
    }

    pub fn diagnostics(&self) -> DiagnosticLevel {
        self.diagnostics
    }

    pub fn check_descriptors(&self) -> bool {
        self.check_descriptors
    }

    pub fn check_outputs(&self) -> bool {
        self.check_outputs
    }
}

#[cfg(test)]
mod tests {
    use super::InferOptions;
    use crate::diagnostics::DiagnosticLevel;

    #[test]
    fn test_builder() {
        let opts = InferOptions::default();
        assert_eq!(opts.diagnostics(), DiagnosticLevel::Off);
        assert!(!opts.check_descriptors());
        assert!(!opts.check_outputs());

        let opts = opts
            .with_diagnostics(DiagnosticLevel::Info)
            .with_check_descriptors(true)
            .with_check_outputs(true);
        assert_eq!(opts.diagnostics(), DiagnosticLevel::Info);
        assert!(opts.check_descriptors());
        assert!(opts.check_outputs());
    }

    // No other test reads these variables.
    #[test]
    fn test_from_env() {
        const VARS: [&str; 3] = [
            "OPSHAPE_DIAGNOSTICS",
            "OPSHAPE_CHECK_DESCRIPTORS",
            "OPSHAPE_CHECK_OUTPUTS",
        ];
        for var in VARS {
            std::env::remove_var(var);
        }
        assert_eq!(InferOptions::from_env(), InferOptions::default());

        std::env::set_var("OPSHAPE_DIAGNOSTICS", "Warn");
        std::env::set_var("OPSHAPE_CHECK_DESCRIPTORS", "1");
        std::env::set_var("OPSHAPE_CHECK_OUTPUTS", "no");
        let opts = InferOptions::from_env();
        assert_eq!(opts.diagnostics(), DiagnosticLevel::Warn);
        assert!(opts.check_descriptors());
        assert!(!opts.check_outputs());

        std::env::set_var("OPSHAPE_DIAGNOSTICS", "info");
        std::env::set_var("OPSHAPE_CHECK_OUTPUTS", "true");
        let opts = InferOptions::from_env();
        assert_eq!(opts.diagnostics(), DiagnosticLevel::Info);
        assert!(opts.check_outputs());

        // Unrecognized values fall back to the defaults.
        std::env::set_var("OPSHAPE_DIAGNOSTICS", "verbose");
        std::env::set_var("OPSHAPE_CHECK_DESCRIPTORS", "perhaps");
        let opts = InferOptions::from_env();
        assert_eq!(opts.diagnostics(), DiagnosticLevel::Off);
        assert!(!opts.check_descriptors());

        for var in VARS {
            std::env::remove_var(var);
        }
    }
}
