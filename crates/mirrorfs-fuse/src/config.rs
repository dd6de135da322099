//! Mount configuration for the FUSE front end.

use fuser::MountOption;

/// Default filesystem name shown in the mount table.
pub const DEFAULT_FS_NAME: &str = "mirrorfs";

/// Default filesystem subtype.
pub const DEFAULT_SUBTYPE: &str = "mirror";

/// Options controlling how the mirror is mounted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountConfig {
    /// Name shown as the mount source (e.g. in `mount` output).
    pub fs_name: String,

    /// Filesystem subtype (`fuse.<subtype>`).
    pub subtype: String,

    /// Mount read-only.
    pub read_only: bool,

    /// Let users other than the mounting user access the mount.
    pub allow_other: bool,

    /// Unmount automatically when the process exits.
    pub auto_unmount: bool,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            fs_name: DEFAULT_FS_NAME.to_string(),
            subtype: DEFAULT_SUBTYPE.to_string(),
            read_only: false,
            allow_other: false,
            auto_unmount: true,
        }
    }
}

impl MountConfig {
    /// Sets the filesystem name.
    #[must_use]
    pub fn fs_name(mut self, name: impl Into<String>) -> Self {
        self.fs_name = name.into();
        self
    }

    /// Sets read-only mode.
    #[must_use]
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Sets whether other users may access the mount.
    #[must_use]
    pub fn allow_other(mut self, allow_other: bool) -> Self {
        self.allow_other = allow_other;
        self
    }

    /// Sets whether the mount is removed when the process exits.
    #[must_use]
    pub fn auto_unmount(mut self, auto_unmount: bool) -> Self {
        self.auto_unmount = auto_unmount;
        self
    }

    /// Converts this configuration into fuser mount options.
    pub fn mount_options(&self) -> Vec<MountOption> {
        let mut options = vec![
            MountOption::FSName(self.fs_name.clone()),
            MountOption::Subtype(self.subtype.clone()),
        ];

        #[cfg(target_os = "macos")]
        options.push(MountOption::CUSTOM(format!("volname={}", self.fs_name)));

        if self.auto_unmount {
            options.push(MountOption::AutoUnmount);
        }
        if self.allow_other {
            options.push(MountOption::AllowOther);
        }
        if self.read_only {
            options.push(MountOption::RO);
        } else {
            options.push(MountOption::RW);
        }
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = MountConfig::default().mount_options();
        assert!(options.contains(&MountOption::FSName("mirrorfs".to_string())));
        assert!(options.contains(&MountOption::Subtype("mirror".to_string())));
        assert!(options.contains(&MountOption::AutoUnmount));
        assert!(options.contains(&MountOption::RW));
        assert!(!options.contains(&MountOption::AllowOther));
    }

    #[test]
    fn test_builder_pattern() {
        let config = MountConfig::default()
            .fs_name("mirror:data")
            .read_only(true)
            .allow_other(true)
            .auto_unmount(false);
        let options = config.mount_options();

        assert_eq!(config.fs_name, "mirror:data");
        assert!(options.contains(&MountOption::RO));
        assert!(!options.contains(&MountOption::RW));
        assert!(options.contains(&MountOption::AllowOther));
        assert!(!options.contains(&MountOption::AutoUnmount));
    }
}
