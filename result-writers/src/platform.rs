// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Host platform information, and parsing of target framework monikers.

use std::fmt;

/// The operating system family a run happened on.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OsPlatform {
    /// Windows.
    Windows,
    /// Linux.
    Linux,
    /// macOS.
    MacOs,
    /// Any other operating system.
    Unknown,
}

impl OsPlatform {
    /// Returns the platform of the current host.
    pub fn current() -> Self {
        Self::from_os_name(std::env::consts::OS)
    }

    /// Maps an OS name as returned by [`std::env::consts::OS`].
    pub fn from_os_name(os: &str) -> Self {
        match os {
            "windows" => Self::Windows,
            "linux" => Self::Linux,
            "macos" => Self::MacOs,
            _ => Self::Unknown,
        }
    }

    /// The human-readable name of the platform.
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Windows => "Windows",
            Self::Linux => "Linux",
            Self::MacOs => "macOS",
            Self::Unknown => "Unknown",
        }
    }

    /// The platform family name used by NUnit reports.
    pub fn nunit_platform(self) -> &'static str {
        match self {
            Self::Windows => "Win32NT",
            Self::Linux | Self::MacOs | Self::Unknown => "Unix",
        }
    }
}

impl fmt::Display for OsPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Information about the host a run happened on.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HostPlatform {
    /// The operating system family.
    pub os: OsPlatform,

    /// A description of the operating system release, e.g. `Ubuntu 24.04 LTS`.
    pub os_description: String,

    /// The lowercase processor architecture, e.g. `x64` or `arm64`.
    pub architecture: String,
}

impl HostPlatform {
    /// Detects the current host.
    pub fn current() -> Self {
        let os = OsPlatform::current();
        let os_description = whoami::distro()
            .ok()
            .map(|distro| distro.trim().to_owned())
            .filter(|distro| !distro.is_empty())
            .unwrap_or_else(|| os.display_name().to_owned());
        Self {
            os,
            os_description,
            architecture: architecture_name(std::env::consts::ARCH).to_owned(),
        }
    }
}

/// Maps a Rust architecture name to the name used by .NET reports.
pub fn architecture_name(arch: &str) -> &str {
    match arch {
        "x86_64" => "x64",
        "x86" => "x86",
        "aarch64" => "arm64",
        "arm" => "arm",
        "s390x" => "s390x",
        "powerpc64" => "ppc64le",
        "loongarch64" => "loongarch64",
        "riscv64" => "riscv64",
        other => other,
    }
}

/// A parsed target framework moniker, such as `.NETCoreApp,Version=v8.0`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TargetFramework {
    identifier: String,
    version: String,
}

impl TargetFramework {
    /// The identifier for .NET Framework monikers.
    pub const NET_FRAMEWORK: &'static str = ".NETFramework";

    /// Parses a moniker of the form `{identifier},Version=v{version}[,Profile={profile}]`.
    ///
    /// Returns `None` if the moniker is malformed.
    pub fn parse(moniker: &str) -> Option<Self> {
        let mut components = moniker.split(',');
        let identifier = components.next()?.trim();
        if identifier.is_empty() {
            return None;
        }

        let mut version = None;
        for component in components {
            let (key, value) = component.split_once('=')?;
            let key = key.trim();
            if key.eq_ignore_ascii_case("Version") {
                version = Some(parse_version(value.trim())?);
            } else if !key.eq_ignore_ascii_case("Profile") {
                return None;
            }
        }

        Some(Self {
            identifier: identifier.to_owned(),
            version: version?,
        })
    }

    /// The framework identifier, e.g. `.NETCoreApp`.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// The normalized framework version, e.g. `8.0`.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// The short runtime framework name used by NUnit: `net-{version}` for .NET Framework,
    /// `netcore-{version}` for everything else.
    pub fn runtime_framework(&self) -> String {
        if self.identifier == Self::NET_FRAMEWORK {
            format!("net-{}", self.version)
        } else {
            format!("netcore-{}", self.version)
        }
    }
}

// Versions have two to four numeric components, optionally prefixed with `v`.
fn parse_version(input: &str) -> Option<String> {
    let input = input
        .strip_prefix('v')
        .or_else(|| input.strip_prefix('V'))
        .unwrap_or(input);
    let components = input
        .split('.')
        .map(|component| component.parse::<u32>().ok())
        .collect::<Option<Vec<_>>>()?;
    if !(2..=4).contains(&components.len()) {
        return None;
    }

    Some(
        components
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join("."),
    )
}
