//! Process exit codes shared by the supervisor and its children (sysexits-style).

/// Exit status of any procvisor process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitCode {
    /// Clean stop.
    Success,
    /// Orphaned worker or configuration process.
    ParentChanged,
    /// The IPC rendezvous socket could not be created or found.
    Unavailable,
    /// Internal fatal error.
    Software,
    /// Invalid settings or cluster configuration.
    Config,
}

impl ExitCode {
    /// Numeric status.
    pub fn code(self) -> u8 {
        match self {
            ExitCode::Success => 0,
            ExitCode::ParentChanged => 2,
            ExitCode::Unavailable => 69,
            ExitCode::Software => 70,
            ExitCode::Config => 78,
        }
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        std::process::ExitCode::from(code.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        let codes: Vec<u8> = [
            ExitCode::Success,
            ExitCode::ParentChanged,
            ExitCode::Unavailable,
            ExitCode::Software,
            ExitCode::Config,
        ]
        .into_iter()
        .map(ExitCode::code)
        .collect();
        assert_eq!(codes, vec![0, 2, 69, 70, 78]);
    }
}
