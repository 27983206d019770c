//! Child-process environment and its redacted diagnostic echo.

use std::collections::BTreeMap;
use std::path::Path;

use crate::model::Mode;

/// Placeholder printed in place of any value not explicitly visible.
pub const HIDDEN: &str = "{hidden}";

/// Variables and whether their values may be printed. Anything missing from
/// this table is hidden.
pub const SAFE_TO_LOG: &[(&str, bool)] = &[
    ("ACCTEST_PARALLELISM", true),
    ("COMMIT_SHA", true),
    ("GITHUB_TOKEN", false),
    ("GITHUB_TOKEN_CLASSIC", false),
    ("GITHUB_TOKEN_DOWNSTREAMS", false),
    ("GITHUB_TOKEN_MAGIC_MODULES", false),
    ("GOCACHE", true),
    ("GOOGLE_APPLICATION_CREDENTIALS", false),
    ("GOOGLE_BILLING_ACCOUNT", false),
    ("GOOGLE_CHRONICLE_INSTANCE_ID", true),
    ("GOOGLE_CREDENTIALS", false),
    ("GOOGLE_CUST_ID", true),
    ("GOOGLE_IDENTITY_USER", true),
    ("GOOGLE_MASTER_BILLING_ACCOUNT", false),
    ("GOOGLE_ORG", true),
    ("GOOGLE_ORG_2", true),
    ("GOOGLE_ORG_DOMAIN", true),
    ("GOOGLE_PROJECT", true),
    ("GOOGLE_PROJECT_NUMBER", true),
    ("GOOGLE_PUBLIC_AVERTISED_PREFIX_DESCRIPTION", true),
    ("GOOGLE_REGION", true),
    ("GOOGLE_SERVICE_ACCOUNT", true),
    ("GOOGLE_TEST_DIRECTORY", true),
    ("GOOGLE_VMWAREENGINE_PROJECT", true),
    ("GOOGLE_ZONE", true),
    ("GOPATH", true),
    ("HOME", true),
    ("PATH", true),
    ("SA_KEY", false),
    ("TF_ACC", true),
    ("TF_LOG", true),
    ("TF_LOG_CORE", true),
    ("TF_LOG_PATH_MASK", true),
    ("TF_LOG_SDK_FRAMEWORK", true),
    ("TF_SCHEMA_PANIC_ON_ERROR", true),
    ("USER", true),
    ("VCR_MODE", true),
    ("VCR_PATH", true),
];

/// CI variables copied from the orchestrator's own environment into every
/// test invocation.
pub const FORWARDED_VARS: &[&str] = &[
    "COMMIT_SHA",
    "GOCACHE",
    "GOOGLE_BILLING_ACCOUNT",
    "GOOGLE_CHRONICLE_INSTANCE_ID",
    "GOOGLE_CUST_ID",
    "GOOGLE_IDENTITY_USER",
    "GOOGLE_MASTER_BILLING_ACCOUNT",
    "GOOGLE_ORG",
    "GOOGLE_ORG_2",
    "GOOGLE_ORG_DOMAIN",
    "GOOGLE_PROJECT",
    "GOOGLE_PROJECT_NUMBER",
    "GOOGLE_PUBLIC_AVERTISED_PREFIX_DESCRIPTION",
    "GOOGLE_REGION",
    "GOOGLE_SERVICE_ACCOUNT",
    "GOOGLE_VMWAREENGINE_PROJECT",
    "GOOGLE_ZONE",
    "GOPATH",
    "HOME",
    "PATH",
    "SA_KEY",
    "USER",
];

/// Whether `key`'s value may appear in logs.
pub fn is_visible(key: &str) -> bool {
    SAFE_TO_LOG
        .iter()
        .any(|(name, visible)| *name == key && *visible)
}

/// Render `env` as `KEY=value` lines with every non-visible value replaced.
pub fn redacted_env(env: &BTreeMap<String, String>) -> String {
    let mut out = String::new();
    for (key, val) in env {
        let shown = if is_visible(key) { val.as_str() } else { HIDDEN };
        out.push_str(key);
        out.push('=');
        out.push_str(shown);
        out.push('\n');
    }
    out
}

/// Collect [`FORWARDED_VARS`] from the current process environment.
pub fn forwarded_env() -> BTreeMap<String, String> {
    FORWARDED_VARS
        .iter()
        .filter_map(|key| std::env::var(key).ok().map(|val| (key.to_string(), val)))
        .collect()
}

/// Inputs for one test invocation's environment.
#[derive(Debug, Clone)]
pub struct TestEnv<'a> {
    pub mode: Mode,
    pub fixture_dir: &'a Path,
    pub log_dir: &'a Path,
    pub parallelism: usize,
    pub test_dirs: &'a [String],
    /// Absolute path of the provisioned service-account key, if any.
    pub credentials_file: Option<&'a Path>,
}

impl TestEnv<'_> {
    /// Build the full environment. `overrides` are applied last and win.
    pub fn build(&self, overrides: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        let mut set = |key: &str, val: String| {
            env.insert(key.to_string(), val);
        };
        set("VCR_PATH", self.fixture_dir.display().to_string());
        set("VCR_MODE", self.mode.upper().to_string());
        set("ACCTEST_PARALLELISM", self.parallelism.to_string());
        set(
            "GOOGLE_CREDENTIALS",
            overrides.get("SA_KEY").cloned().unwrap_or_default(),
        );
        set("GOOGLE_TEST_DIRECTORY", self.test_dirs.join(" "));
        set("TF_LOG", "DEBUG".to_string());
        set("TF_LOG_CORE", "WARN".to_string());
        set("TF_LOG_SDK_FRAMEWORK", "INFO".to_string());
        set(
            "TF_LOG_PATH_MASK",
            self.log_dir.join("%s.log").display().to_string(),
        );
        set("TF_ACC", "1".to_string());
        set("TF_SCHEMA_PANIC_ON_ERROR", "1".to_string());
        if let Some(key_file) = self.credentials_file {
            set(
                "GOOGLE_APPLICATION_CREDENTIALS",
                key_file.display().to_string(),
            );
        }
        for (key, val) in overrides {
            env.insert(key.clone(), val.clone());
        }
        env
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn overrides(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn sample<'a>(dirs: &'a [String], fixtures: &'a Path, logs: &'a Path) -> TestEnv<'a> {
        TestEnv {
            mode: Mode::Recording,
            fixture_dir: fixtures,
            log_dir: logs,
            parallelism: 32,
            test_dirs: dirs,
            credentials_file: None,
        }
    }

    #[test]
    fn test_build_sets_contract_keys() {
        let dirs = vec!["./a".to_string(), "./b".to_string()];
        let fixtures = PathBuf::from("/base/cassettes/beta");
        let logs = PathBuf::from("/base/testlogs/recording/beta");
        let env = sample(&dirs, &fixtures, &logs).build(&overrides(&[("SA_KEY", "secret")]));

        assert_eq!(env["VCR_PATH"], "/base/cassettes/beta");
        assert_eq!(env["VCR_MODE"], "RECORDING");
        assert_eq!(env["ACCTEST_PARALLELISM"], "32");
        assert_eq!(env["GOOGLE_CREDENTIALS"], "secret");
        assert_eq!(env["GOOGLE_TEST_DIRECTORY"], "./a ./b");
        assert_eq!(env["TF_LOG"], "DEBUG");
        assert_eq!(env["TF_LOG_CORE"], "WARN");
        assert_eq!(env["TF_LOG_SDK_FRAMEWORK"], "INFO");
        assert_eq!(
            env["TF_LOG_PATH_MASK"],
            "/base/testlogs/recording/beta/%s.log"
        );
        assert_eq!(env["TF_ACC"], "1");
        assert_eq!(env["TF_SCHEMA_PANIC_ON_ERROR"], "1");
        assert!(!env.contains_key("GOOGLE_APPLICATION_CREDENTIALS"));
    }

    #[test]
    fn test_credentials_file_only_when_provisioned() {
        let dirs = vec!["./a".to_string()];
        let fixtures = PathBuf::from("/f");
        let logs = PathBuf::from("/l");
        let key = PathBuf::from("/base/sa_key.json");
        let mut test_env = sample(&dirs, &fixtures, &logs);
        test_env.credentials_file = Some(&key);
        let env = test_env.build(&BTreeMap::new());
        assert_eq!(env["GOOGLE_APPLICATION_CREDENTIALS"], "/base/sa_key.json");
        assert_eq!(env["GOOGLE_CREDENTIALS"], "");
    }

    #[test]
    fn test_caller_overrides_win() {
        let dirs = vec!["./a".to_string()];
        let fixtures = PathBuf::from("/f");
        let logs = PathBuf::from("/l");
        let env = sample(&dirs, &fixtures, &logs)
            .build(&overrides(&[("TF_LOG", "TRACE"), ("GOOGLE_PROJECT", "p")]));
        assert_eq!(env["TF_LOG"], "TRACE");
        assert_eq!(env["GOOGLE_PROJECT"], "p");
    }

    #[test]
    fn test_redaction_hides_unlisted_and_secret_keys() {
        let env = overrides(&[
            ("GOOGLE_CREDENTIALS", "super-secret-json"),
            ("SA_KEY", "another-secret"),
            ("SOME_NEW_TOKEN", "unlisted-secret"),
            ("GOOGLE_PROJECT", "my-project"),
            ("VCR_MODE", "REPLAYING"),
        ]);
        let printed = redacted_env(&env);

        assert!(printed.contains("GOOGLE_PROJECT=my-project\n"));
        assert!(printed.contains("VCR_MODE=REPLAYING\n"));
        assert!(printed.contains("GOOGLE_CREDENTIALS={hidden}\n"));
        assert!(printed.contains("SOME_NEW_TOKEN={hidden}\n"));
        for secret in ["super-secret-json", "another-secret", "unlisted-secret"] {
            assert!(!printed.contains(secret), "leaked {secret}");
        }
    }

    #[test]
    fn test_every_non_visible_key_is_hidden() {
        let env: BTreeMap<String, String> = SAFE_TO_LOG
            .iter()
            .map(|(k, _)| (k.to_string(), format!("value-of-{k}")))
            .collect();
        let printed = redacted_env(&env);
        for (key, visible) in SAFE_TO_LOG {
            let revealed = printed.contains(&format!("value-of-{key}\n"));
            assert_eq!(revealed, *visible, "{key}");
        }
    }
}
