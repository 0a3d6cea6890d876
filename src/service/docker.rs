//! Docker-CLI-backed environment manager.
//!
//! Each session gets its own container, published on loopback-only random
//! host ports. Startup is considered complete once the WebDriver port
//! accepts TCP connections; teardown is a force-remove of the container.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use tokio::net::TcpStream;
use tokio::process::Command;

use super::catalog::{BrowserImage, Catalog};
use super::error::{ServiceError, ServiceResult};
use super::{LogStream, Manager, StartedEnvironment, Starter, Upstream};

const VNC_PORT: u16 = 5900;

/// Environment manager that launches browser containers via the Docker CLI.
#[derive(Debug, Clone)]
pub struct DockerManager {
    binary: String,
    catalog: Catalog,
    startup_timeout: Duration,
}

impl DockerManager {
    /// Create a manager, auto-detecting `docker` (then `podman`) in PATH.
    pub fn new(catalog: Catalog, startup_timeout: Duration) -> Self {
        let binary = if is_binary_available("docker") {
            "docker"
        } else if is_binary_available("podman") {
            "podman"
        } else {
            // No runtime found; commands will fail at call time.
            "docker"
        };
        Self::with_binary(binary, catalog, startup_timeout)
    }

    pub fn with_binary(
        binary: impl Into<String>,
        catalog: Catalog,
        startup_timeout: Duration,
    ) -> Self {
        Self {
            binary: binary.into(),
            catalog,
            startup_timeout,
        }
    }
}

#[async_trait]
impl Manager for DockerManager {
    fn find(
        &self,
        name: &str,
        version: &mut String,
        screen: &str,
        vnc: bool,
        serial: u64,
    ) -> Option<Box<dyn Starter>> {
        let (resolved, image) = self.catalog.resolve(name, version)?;
        debug!(
            "[{serial}] resolved {name} {version:?} to {resolved} ({})",
            image.image
        );
        *version = resolved;
        Some(Box::new(DockerStarter {
            binary: self.binary.clone(),
            image,
            screen: screen.to_string(),
            vnc,
            serial,
            startup_timeout: self.startup_timeout,
        }))
    }

    async fn follow_logs(&self, container: &str) -> ServiceResult<LogStream> {
        validate_container_id(container)?;
        let child = Command::new(&self.binary)
            .args(["logs", "-f", container])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        LogStream::from_child(child)
    }
}

/// One-shot starter for a single browser container.
struct DockerStarter {
    binary: String,
    image: BrowserImage,
    screen: String,
    vnc: bool,
    serial: u64,
    startup_timeout: Duration,
}

#[async_trait]
impl Starter for DockerStarter {
    async fn start_with_cancel(self: Box<Self>) -> ServiceResult<StartedEnvironment> {
        validate_image_name(&self.image.image)?;

        let args = run_args(&self.image, &self.screen, self.vnc);
        let id = command_output(&self.binary, &args).await?;
        debug!("[{}] started container {id}", self.serial);

        // Everything past this point must not leak the container on failure.
        match self.inspect_and_wait(&id).await {
            Ok((upstream, vnc)) => {
                let binary = self.binary.clone();
                let container = id.clone();
                Ok(StartedEnvironment {
                    upstream,
                    container: Some(id),
                    vnc,
                    cancel: Box::new(move || {
                        Box::pin(async move {
                            if let Err(err) = remove_container(&binary, &container).await {
                                warn!("removing container {container} failed: {err}");
                            }
                        })
                    }),
                })
            }
            Err(err) => {
                if let Err(rm_err) = remove_container(&self.binary, &id).await {
                    warn!("cleanup of container {id} failed: {rm_err}");
                }
                Err(err)
            }
        }
    }
}

impl DockerStarter {
    async fn inspect_and_wait(&self, id: &str) -> ServiceResult<(Upstream, Option<String>)> {
        let webdriver = mapped_port(&self.binary, id, self.image.port).await?;
        let addr = format!("127.0.0.1:{webdriver}");
        wait_for_listener(&addr, id, self.startup_timeout).await?;

        let vnc = if self.vnc {
            let port = mapped_port(&self.binary, id, VNC_PORT).await?;
            Some(format!("127.0.0.1:{port}"))
        } else {
            None
        };

        let upstream = Upstream {
            host: addr,
            path: self.image.path.clone(),
        };
        Ok((upstream, vnc))
    }
}

/// Assemble the `run` arguments for a browser container.
fn run_args(image: &BrowserImage, screen: &str, vnc: bool) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "-d".to_string(),
        "-e".to_string(),
        format!("SCREEN_RESOLUTION={screen}"),
        "-p".to_string(),
        format!("127.0.0.1::{}", image.port),
    ];
    if vnc {
        args.push("-e".to_string());
        args.push("ENABLE_VNC=true".to_string());
        args.push("-p".to_string());
        args.push(format!("127.0.0.1::{VNC_PORT}"));
    }
    args.push(image.image.clone());
    args
}

/// Force-remove a container.
pub async fn remove_container(binary: &str, container: &str) -> ServiceResult<()> {
    validate_container_id(container)?;
    command_output(binary, &["rm".to_string(), "-f".to_string(), container.to_string()]).await?;
    Ok(())
}

/// Discover the random host port published for a container port.
async fn mapped_port(binary: &str, container: &str, container_port: u16) -> ServiceResult<u16> {
    validate_container_id(container)?;
    let output = command_output(
        binary,
        &[
            "port".to_string(),
            container.to_string(),
            format!("{container_port}/tcp"),
        ],
    )
    .await?;
    // First line looks like "127.0.0.1:49153".
    output
        .lines()
        .next()
        .and_then(|line| line.trim().rsplit(':').next())
        .and_then(|port| port.parse::<u16>().ok())
        .ok_or_else(|| ServiceError::CommandFailed {
            command: "port".to_string(),
            message: format!("unexpected output: {output}"),
        })
}

/// Poll until the address accepts TCP connections or the timeout elapses.
async fn wait_for_listener(addr: &str, container: &str, timeout: Duration) -> ServiceResult<()> {
    let start = tokio::time::Instant::now();
    let mut attempts: u32 = 0;
    loop {
        match TcpStream::connect(addr).await {
            Ok(_) => return Ok(()),
            Err(err) => {
                if start.elapsed() >= timeout {
                    debug!("giving up on {addr}: {err}");
                    return Err(ServiceError::NotResponding {
                        container: container.to_string(),
                        addr: addr.to_string(),
                    });
                }
                attempts += 1;
                let backoff = Duration::from_millis((attempts.min(20) as u64) * 100);
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

async fn command_output(binary: &str, args: &[String]) -> ServiceResult<String> {
    let output = Command::new(binary)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| ServiceError::CommandFailed {
            command: args.first().cloned().unwrap_or_default(),
            message: e.to_string(),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ServiceError::CommandFailed {
            command: args.first().cloned().unwrap_or_default(),
            message: stderr.trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn is_binary_available(name: &str) -> bool {
    std::process::Command::new("which")
        .arg(name)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Validate a container image reference before shelling out.
fn validate_image_name(image: &str) -> ServiceResult<()> {
    if image.is_empty() || image.len() > 256 {
        return Err(ServiceError::InvalidInput(
            "image name must be 1-256 characters".to_string(),
        ));
    }
    let valid = |c: char| {
        c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '/' | ':' | '@')
    };
    if !image.chars().all(valid) || image.contains("..") {
        return Err(ServiceError::InvalidInput(format!(
            "image name '{image}' contains invalid characters"
        )));
    }
    Ok(())
}

/// Validate a container id or name before shelling out.
fn validate_container_id(id: &str) -> ServiceResult<()> {
    if id.is_empty() || id.len() > 128 {
        return Err(ServiceError::InvalidInput(
            "container id must be 1-128 characters".to_string(),
        ));
    }
    let valid = |c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_';
    if !id.chars().all(valid) {
        return Err(ServiceError::InvalidInput(format!(
            "container id '{id}' contains invalid characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(path: &str) -> BrowserImage {
        BrowserImage {
            image: "selenoid/firefox:57.0".to_string(),
            port: 4444,
            path: path.to_string(),
        }
    }

    #[test]
    fn run_args_without_vnc() {
        let args = run_args(&image("/wd/hub"), "1920x1080x24", false);
        assert_eq!(
            args,
            [
                "run",
                "-d",
                "-e",
                "SCREEN_RESOLUTION=1920x1080x24",
                "-p",
                "127.0.0.1::4444",
                "selenoid/firefox:57.0"
            ]
        );
    }

    #[test]
    fn run_args_with_vnc_publishes_the_vnc_port() {
        let args = run_args(&image(""), "1024x768x24", true);
        assert!(args.contains(&"ENABLE_VNC=true".to_string()));
        assert!(args.contains(&"127.0.0.1::5900".to_string()));
    }

    #[test]
    fn image_names_are_validated() {
        assert!(validate_image_name("selenoid/firefox:57.0").is_ok());
        assert!(validate_image_name("gcr.io/p/image@sha256:abc").is_ok());
        assert!(validate_image_name("").is_err());
        assert!(validate_image_name("image$(whoami)").is_err());
        assert!(validate_image_name("../../etc/passwd").is_err());
    }

    #[test]
    fn container_ids_are_validated() {
        assert!(validate_container_id("9f86d081884c").is_ok());
        assert!(validate_container_id("").is_err());
        assert!(validate_container_id("id;rm -rf /").is_err());
    }

    #[test]
    fn find_resolves_versions_through_the_catalog() {
        let catalog = Catalog::from_json(
            r#"{"firefox":{"default":"57.0","versions":{"57.0":{"image":"selenoid/firefox:57.0"}}}}"#,
        );
        let manager = DockerManager::with_binary("docker", catalog, Duration::from_secs(30));
        let mut version = String::new();
        assert!(manager.find("firefox", &mut version, "1920x1080x24", false, 0).is_some());
        assert_eq!(version, "57.0");
        assert!(manager.find("opera", &mut version, "1920x1080x24", false, 0).is_none());
    }
}
