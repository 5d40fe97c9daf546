use config::{Config, File, FileFormat};
use std::env;

const DEFAULT_SECURE_PROFILE_PATH: &str = "/etc/krb5.conf";
const DEFAULT_PROFILE_PATH: &str = DEFAULT_SECURE_PROFILE_PATH;

const CONF_YES: [&str; 6] = ["y", "yes", "true", "t", "1", "on"];
const CONF_NO: [&str; 6] = ["n", "no", "false", "nil", "0", "off"];

/// The historical boolean lexicon of the configuration file. Values outside
/// both lists read as false.
pub fn conf_boolean(value: &str) -> bool {
    if CONF_YES.iter().any(|v| v.eq_ignore_ascii_case(value)) {
        return true;
    }
    if CONF_NO.iter().any(|v| v.eq_ignore_ascii_case(value)) {
        return false;
    }
    // Unknown values default to "no".
    false
}

#[derive(Debug)]
pub struct Profile {
    files: Vec<ProfileFile>,
}

macro_rules! get_value {
    ($fn:ident, $type:ident) => {
        pub fn $fn(&self, key: &str) -> Option<$type> {
            for file in &self.files {
                if let Ok(value) = file.config.$fn(key) {
                    return Some(value);
                }
            }
            None
        }
    };
}

impl Profile {
    pub fn new(secure: bool) -> anyhow::Result<Self> {
        let mut profile_files = vec![];
        for file in Self::default_config_files(secure) {
            profile_files.push(ProfileFile::new(&file)?);
        }
        Ok(Self {
            files: profile_files,
        })
    }

    /// A profile with no backing files; every lookup misses.
    pub fn empty() -> Self {
        Self { files: vec![] }
    }

    pub fn from_ini(text: &str) -> anyhow::Result<Self> {
        let config = Config::builder()
            .add_source(File::from_str(text, FileFormat::Ini))
            .build()?;
        Ok(Self {
            files: vec![ProfileFile { config }],
        })
    }

    fn default_config_files(secure: bool) -> Vec<String> {
        let filepath = if secure {
            DEFAULT_SECURE_PROFILE_PATH.to_owned()
        } else {
            env::var("KRB5_CONFIG").unwrap_or(DEFAULT_PROFILE_PATH.to_owned())
        };
        filepath.split(':').map(|f| f.to_owned()).collect()
    }

    get_value!(get_string, String);

    get_value!(get_bool, bool);

    get_value!(get_int, i64);
}

#[derive(Debug)]
struct ProfileFile {
    config: Config,
}

impl ProfileFile {
    fn new(filename: &str) -> anyhow::Result<Self> {
        let expanded_filename = match (filename.starts_with("~/"), env::var("HOME")) {
            (true, Ok(home_env)) => format!("{}{}", home_env, &filename[1..]),
            _ => filename.to_owned(),
        };
        let config = Config::builder()
            .add_source(File::with_name(&expanded_filename).format(FileFormat::Ini))
            .build()?;
        Ok(Self { config })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boolean_lexicon_is_case_insensitive() {
        for yes in ["y", "YES", "True", "t", "1", "On"] {
            assert!(conf_boolean(yes), "{} should read true", yes);
        }
        for no in ["n", "No", "false", "NIL", "0", "off"] {
            assert!(!conf_boolean(no), "{} should read false", no);
        }
        assert!(!conf_boolean("maybe"));
        assert!(!conf_boolean(""));
    }

    #[test]
    fn ini_profiles_resolve_nested_keys() {
        let profile = Profile::from_ini(
            "[libdefaults]\nclockskew = 120\nforwardable = yes\n",
        )
        .unwrap();
        assert_eq!(profile.get_int("libdefaults.clockskew"), Some(120));
        assert_eq!(
            profile.get_string("libdefaults.forwardable").as_deref(),
            Some("yes")
        );
        assert_eq!(profile.get_string("libdefaults.absent"), None);
    }
}
