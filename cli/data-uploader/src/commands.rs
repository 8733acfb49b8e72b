//! Command line definition and the upload flow.

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Result;
use clap::Parser;

use crate::client::LoomClient;
use crate::error::UploaderError;
use crate::output::{print_info, print_success};
use crate::resource::Payload;
use crate::target::RemoteTarget;

/// Upload, stage or sync a Loom plugin resource.
#[derive(Debug, Parser)]
#[command(name = "data-uploader")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "Example:\n  data-uploader -u http://localhost:55054 -t superadmin -U admin \
    sync ./my/local/cookbooks/hadoop automatortypes/chef-solo/cookbooks/hadoop")]
pub struct Cli {
    /// Server URI.
    #[arg(short = 'u', long, env = "LOOM_SERVER_URI", default_value = "http://localhost:55054")]
    uri: String,

    /// Tenant.
    #[arg(short = 't', long, env = "LOOM_TENANT", default_value = "superadmin")]
    tenant: String,

    /// User.
    #[arg(short = 'U', long, env = "LOOM_API_USER", default_value = "admin")]
    user: String,

    /// One of upload, stage, or sync (sync can be dangerous).
    action: Option<String>,

    /// Path to the local copy of the resource to upload.
    local_path: Option<PathBuf>,

    /// API path defining the resource: plugin_type/plugin_name/resource_type/resource_name.
    remote_target: Option<String>,
}

/// What to do after validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Upload a new version.
    Upload,
    /// Upload, then stage the new version.
    Stage,
    /// Upload, stage, then sync everything staged.
    Sync,
}

impl FromStr for Action {
    type Err = UploaderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "upload" => Ok(Action::Upload),
            "stage" => Ok(Action::Stage),
            "sync" => Ok(Action::Sync),
            _ => Err(UploaderError::InvalidAction),
        }
    }
}

/// Arguments that passed local validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub action: Action,
    pub local_path: PathBuf,
    pub target: RemoteTarget,
}

impl Cli {
    /// Run the CLI command.
    pub async fn run(self) -> Result<()> {
        let request = self.validate()?;
        let client = LoomClient::new(&self.uri, &self.user, &self.tenant)?;
        execute(&client, &request).await?;
        Ok(())
    }

    /// Check arguments in order: action, local path, remote target.
    fn validate(&self) -> Result<UploadRequest, UploaderError> {
        let action = self
            .action
            .as_deref()
            .ok_or(UploaderError::InvalidAction)?
            .parse::<Action>()?;

        let local_path = self.local_path.clone().ok_or(UploaderError::MissingPath)?;
        if !local_path.exists() {
            return Err(UploaderError::PathNotFound(local_path));
        }

        let target = self
            .remote_target
            .as_deref()
            .ok_or(UploaderError::MissingTarget)?
            .parse::<RemoteTarget>()?;

        Ok(UploadRequest {
            action,
            local_path,
            target,
        })
    }
}

/// Validate against the server, then upload and optionally stage and sync.
pub async fn execute(client: &LoomClient, request: &UploadRequest) -> Result<(), UploaderError> {
    client.check_status().await?;
    let format = client.resource_format(&request.target).await?;
    let payload = Payload::for_path(&request.local_path, format)?;

    if let Payload::Directory(dir) = &payload {
        print_info(&format!(
            "Packing {} as {}",
            dir.display(),
            request.target.resource_name
        ));
    }
    let body = payload.into_body(&request.target.resource_name)?;

    let (uri, receipt) = client.upload(&request.target, body).await?;
    let version = receipt.version_label();
    print_success(&format!("upload successful, uri: {}, version: {}", uri, version));

    if matches!(request.action, Action::Stage | Action::Sync) {
        let uri = client.stage(&request.target, &version).await?;
        print_success(&format!("stage successful: {}", uri));
    }

    if request.action == Action::Sync {
        client.sync().await?;
        print_success("sync successful");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use rstest::rstest;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn cli(action: Option<&str>, local_path: Option<&Path>, target: Option<&str>) -> Cli {
        Cli {
            uri: "http://localhost:55054".to_string(),
            tenant: "superadmin".to_string(),
            user: "admin".to_string(),
            action: action.map(str::to_string),
            local_path: local_path.map(Path::to_path_buf),
            remote_target: target.map(str::to_string),
        }
    }

    #[rstest]
    #[case("upload", Action::Upload)]
    #[case("STAGE", Action::Stage)]
    #[case("Sync", Action::Sync)]
    fn test_action_is_case_insensitive(#[case] input: &str, #[case] expected: Action) {
        assert_eq!(input.parse::<Action>().unwrap(), expected);
    }

    #[test]
    fn test_cli_parses_flags_and_positionals() {
        let cli = Cli::try_parse_from([
            "data-uploader",
            "-u",
            "http://loom:55054",
            "-t",
            "acme",
            "-U",
            "ops",
            "sync",
            "./cookbooks/hadoop",
            "automatortypes/chef-solo/cookbooks/hadoop",
        ])
        .unwrap();

        assert_eq!(cli.uri, "http://loom:55054");
        assert_eq!(cli.tenant, "acme");
        assert_eq!(cli.user, "ops");
        assert_eq!(cli.action.as_deref(), Some("sync"));
    }

    #[test]
    fn test_validation_order() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent");

        assert!(matches!(
            cli(None, Some(dir.path()), Some("bad")).validate(),
            Err(UploaderError::InvalidAction)
        ));
        assert!(matches!(
            cli(Some("publish"), None, None).validate(),
            Err(UploaderError::InvalidAction)
        ));
        assert!(matches!(
            cli(Some("upload"), None, Some("bad")).validate(),
            Err(UploaderError::MissingPath)
        ));
        assert!(matches!(
            cli(Some("upload"), Some(&missing), Some("bad")).validate(),
            Err(UploaderError::PathNotFound(_))
        ));
        assert!(matches!(
            cli(Some("upload"), Some(dir.path()), None).validate(),
            Err(UploaderError::MissingTarget)
        ));
        assert!(matches!(
            cli(Some("upload"), Some(dir.path()), Some("bad")).validate(),
            Err(UploaderError::InvalidTarget { .. })
        ));

        let request = cli(
            Some("Stage"),
            Some(dir.path()),
            Some("automatortypes/chef-solo/cookbooks/hadoop"),
        )
        .validate()
        .unwrap();
        assert_eq!(request.action, Action::Stage);
        assert_eq!(request.target.resource_name, "hadoop");
    }

    async fn server_with_plugin(format: &str) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/loom/automatortypes/chef-solo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "resourceTypes": { "cookbooks": { "format": format } }
            })))
            .mount(&server)
            .await;
        server
    }

    fn request(action: Action, local_path: &Path) -> UploadRequest {
        UploadRequest {
            action,
            local_path: local_path.to_path_buf(),
            target: "automatortypes/chef-solo/cookbooks/hadoop".parse().unwrap(),
        }
    }

    #[tokio::test]
    async fn test_sync_uploads_stages_and_syncs() {
        let server = server_with_plugin("archive").await;
        Mock::given(method("POST"))
            .and(path("/v1/loom/automatortypes/chef-solo/cookbooks/hadoop"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "version": 2 })),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/loom/automatortypes/chef-solo/cookbooks/hadoop/versions/2/stage"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/loom/sync"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("metadata.rb"), "name 'hadoop'\n").unwrap();
        let client = LoomClient::new(&server.uri(), "admin", "superadmin").unwrap();

        execute(&client, &request(Action::Sync, dir.path())).await.unwrap();
    }

    #[tokio::test]
    async fn test_upload_only_does_not_stage() {
        let server = server_with_plugin("archive").await;
        Mock::given(method("POST"))
            .and(path("/v1/loom/automatortypes/chef-solo/cookbooks/hadoop"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "version": 1 })),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/loom/automatortypes/chef-solo/cookbooks/hadoop/versions/1/stage"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let tarball = dir.path().join("hadoop.tgz");
        fs::write(&tarball, b"\x1f\x8bprebuilt").unwrap();
        let client = LoomClient::new(&server.uri(), "admin", "superadmin").unwrap();

        execute(&client, &request(Action::Upload, &tarball)).await.unwrap();
    }

    #[tokio::test]
    async fn test_format_mismatch_aborts_before_upload() {
        let server = server_with_plugin("file").await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = LoomClient::new(&server.uri(), "admin", "superadmin").unwrap();

        let err = execute(&client, &request(Action::Sync, dir.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, UploaderError::FormatMismatch { .. }));
    }

    #[tokio::test]
    async fn test_failed_upload_stops_the_flow() {
        let server = server_with_plugin("file").await;
        Mock::given(method("POST"))
            .and(path("/v1/loom/automatortypes/chef-solo/cookbooks/hadoop"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/loom/sync"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("hadoop.json");
        fs::write(&file, "{}").unwrap();
        let client = LoomClient::new(&server.uri(), "admin", "superadmin").unwrap();

        let err = execute(&client, &request(Action::Sync, &file)).await.unwrap_err();
        assert!(matches!(err, UploaderError::Server { status: 500, .. }));
    }
}
