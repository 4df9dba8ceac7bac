//! Pipeline steps and their failure classification

use std::fmt;

use serde::Serialize;

/// What a step failure does to the run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Abort the remaining steps, clean up, fail the run
    Fatal,
    /// Log and continue with the next step
    Soft,
}

/// One step of the build pipeline, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    PrepareWorkspace,
    CloneSource,
    WriteDockerfile,
    BuildImage,
    AllocateAddress,
    CreateDataDir,
    ReleasePreviousAddress,
    RemovePreviousContainer,
    RemovePreviousImage,
    RunContainer,
    ConfigureProxy,
    PersistProject,
}

impl Step {
    /// Every step, in execution order
    pub const ALL: [Step; 12] = [
        Step::PrepareWorkspace,
        Step::CloneSource,
        Step::WriteDockerfile,
        Step::BuildImage,
        Step::AllocateAddress,
        Step::CreateDataDir,
        Step::ReleasePreviousAddress,
        Step::RemovePreviousContainer,
        Step::RemovePreviousImage,
        Step::RunContainer,
        Step::ConfigureProxy,
        Step::PersistProject,
    ];

    pub fn severity(self) -> Severity {
        match self {
            Step::ReleasePreviousAddress | Step::RemovePreviousContainer | Step::RemovePreviousImage => {
                Severity::Soft
            }
            _ => Severity::Fatal,
        }
    }

    pub fn is_fatal(self) -> bool {
        self.severity() == Severity::Fatal
    }

    /// 1-based position in [`Step::ALL`]
    pub fn number(self) -> usize {
        Step::ALL.iter().position(|s| *s == self).map_or(0, |i| i + 1)
    }

    pub fn name(self) -> &'static str {
        match self {
            Step::PrepareWorkspace => "prepare workspace",
            Step::CloneSource => "clone source",
            Step::WriteDockerfile => "write dockerfile",
            Step::BuildImage => "build image",
            Step::AllocateAddress => "allocate address",
            Step::CreateDataDir => "create data directory",
            Step::ReleasePreviousAddress => "release previous address",
            Step::RemovePreviousContainer => "remove previous container",
            Step::RemovePreviousImage => "remove previous image",
            Step::RunContainer => "run container",
            Step::ConfigureProxy => "configure proxy",
            Step::PersistProject => "persist project",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
