//! coscli CLI wrapper for object storage buckets
//!
//! coscli reads credentials from its config file, so a private temporary
//! config is written for every call.

use crate::error::{Result, TencentError};
use labforge_cloud::Credential;
use std::io::Write;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// A bucket as listed by `coscli ls`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketEntry {
    /// Full bucket name, `<name>-<appid>`
    pub name: String,
    pub region: String,
}

#[derive(Debug, Clone)]
pub struct Coscli {
    program: String,
    timeout: Duration,
}

impl Default for Coscli {
    fn default() -> Self {
        Self::new()
    }
}

impl Coscli {
    pub fn new() -> Self {
        Self {
            program: "coscli".to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Buckets of the account in one region
    pub async fn list_buckets(&self, credential: &Credential, region: &str) -> Result<Vec<BucketEntry>> {
        let output = self.run(credential, &["ls"]).await?;
        Ok(parse_bucket_table(&output)
            .into_iter()
            .filter(|b| b.region == region)
            .collect())
    }

    /// Create `bucket` (already suffixed with the app id) in `region`
    pub async fn make_bucket(&self, credential: &Credential, region: &str, bucket: &str) -> Result<()> {
        let url = format!("cos://{}", bucket);
        let endpoint = format!("cos.{}.myqcloud.com", region);
        self.run(credential, &["mb", &url, "-e", &endpoint]).await?;
        Ok(())
    }

    async fn run(&self, credential: &Credential, args: &[&str]) -> Result<String> {
        let label = format!("coscli {}", args.first().copied().unwrap_or_default());

        let mut config = tempfile::Builder::new().suffix(".yaml").tempfile()?;
        write!(
            config,
            "cos:\n  base:\n    secretid: {}\n    secretkey: {}\n    sessiontoken: \"\"\n    protocol: https\n",
            credential.secret_id,
            credential.secret_key()
        )?;
        config.flush()?;

        let mut cmd = Command::new(&self.program);
        cmd.arg("-c").arg(config.path());
        cmd.args(args);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        tracing::debug!("Running: {} {}", self.program, args.join(" "));

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TencentError::CliNotFound(self.program.clone()));
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                return Err(TencentError::Timeout {
                    action: label,
                    timeout: self.timeout,
                });
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TencentError::CommandFailed {
                action: label,
                message: stderr.trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// Parse the table printed by `coscli ls`:
///
/// ```text
/// +------------------------+------------+---------------------+
/// |      BUCKET NAME       |   REGION   |     CREATE DATE     |
/// +------------------------+------------+---------------------+
/// | labforge-bucket-1250000000 | ap-guangzhou | 2026-01-01T00:00:00Z |
/// ```
pub fn parse_bucket_table(output: &str) -> Vec<BucketEntry> {
    output
        .lines()
        .filter(|line| line.trim_start().starts_with('|'))
        .filter_map(|line| {
            let cells: Vec<&str> = line
                .split('|')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .collect();
            match cells.as_slice() {
                [name, region, ..] if !name.eq_ignore_ascii_case("bucket name") => Some(BucketEntry {
                    name: name.to_string(),
                    region: region.to_string(),
                }),
                _ => None,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bucket_table() {
        let output = "\
+------------------------------+--------------+----------------------+
|         BUCKET NAME          |    REGION    |     CREATE DATE      |
+------------------------------+--------------+----------------------+
|  labforge-bucket-1250000000  | ap-guangzhou | 2026-01-01T00:00:00Z |
|  other-1250000000            | ap-shanghai  | 2026-02-01T00:00:00Z |
+------------------------------+--------------+----------------------+
";
        let buckets = parse_bucket_table(output);
        assert_eq!(
            buckets,
            vec![
                BucketEntry {
                    name: "labforge-bucket-1250000000".to_string(),
                    region: "ap-guangzhou".to_string(),
                },
                BucketEntry {
                    name: "other-1250000000".to_string(),
                    region: "ap-shanghai".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_parse_empty_table() {
        assert!(parse_bucket_table("").is_empty());
        assert!(parse_bucket_table("|  BUCKET NAME  |  REGION  |\n").is_empty());
    }
}
