//! Reverse proxy virtual hosts
//!
//! Each deployment gets `<config_dir>/<project>.conf`: a plain-HTTP server
//! redirecting to HTTPS and a TLS server proxying to the container. The proxy
//! itself runs in a container and is reloaded with `nginx -s reload`.

use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info};

use crate::errors::VoltexError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::process::{CommandRunner, CommandSpec, OutputSink};

/// Internal location answering the authentication sub-request
pub const AUTH_LOCATION: &str = "/AidlqSZ1oZu4Rb9a";

/// Header carrying the original request URI to the auth upstream
pub const AUTH_URI_HEADER: &str = "smcehpjpvt5x57zs2ojdsbtlxo0mq7ox";

/// Header carrying `scheme://host` to the auth upstream
pub const AUTH_ORIGIN_HEADER: &str = "syyaeag2jv3zzsnzshvv5dm37vn880pk";

/// One published deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySite {
    pub domain: String,
    pub address: String,
    pub port: u16,
    pub auth_required: bool,
}

/// Fixed parts of every rendered virtual host
#[derive(Debug, Clone)]
pub struct SiteTemplate {
    /// Root of the `<zone>/cert.pem` + `<zone>/cert.key` directories
    pub ssl_dir: String,
    /// `host:port` of the authentication service
    pub auth_upstream: String,
}

impl Default for SiteTemplate {
    fn default() -> Self {
        Self {
            ssl_dir: "/etc/nginx/conf.d/ssl".to_string(),
            auth_upstream: "172.20.0.101:41001".to_string(),
        }
    }
}

/// Parent zone of `domain`: everything after the first label
pub fn parent_zone(domain: &str) -> String {
    domain.split('.').skip(1).collect::<Vec<_>>().join(".")
}

impl SiteTemplate {
    /// Render the virtual host text for `site`. Pure: equal inputs give
    /// byte-identical output.
    pub fn render(&self, site: &ProxySite) -> String {
        let zone = parent_zone(&site.domain);
        let upstream = format!("http://{}:{}", site.address, site.port);
        let mut out = String::new();

        // write! into a String cannot fail
        let _ = write!(
            out,
            "server {{
    listen 80;
    server_name {domain};

    location / {{
        return 301 https://$host$request_uri;
    }}
}}

server {{
    listen 443 ssl;
    server_name {domain};

    ssl_certificate \"{ssl}/{zone}/cert.pem\";
    ssl_certificate_key \"{ssl}/{zone}/cert.key\";

",
            domain = site.domain,
            ssl = self.ssl_dir,
            zone = zone,
        );

        if site.auth_required {
            let _ = write!(
                out,
                "    location / {{
        auth_request {auth};
        auth_request_set $auth_status $upstream_status;
        error_page 401 {auth};

        proxy_set_header Host \"localhost\";
        proxy_set_header X-Real-IP $remote_addr;
        proxy_pass  {upstream};
    }}

    location = {auth} {{
        internal;
        proxy_set_header {uri_header} $request_uri;
        proxy_set_header {origin_header} $scheme://$host;
        proxy_pass http://{auth_upstream};
    }}
",
                auth = AUTH_LOCATION,
                upstream = upstream,
                uri_header = AUTH_URI_HEADER,
                origin_header = AUTH_ORIGIN_HEADER,
                auth_upstream = self.auth_upstream,
            );
        } else {
            let _ = write!(
                out,
                "    location / {{
        proxy_set_header Host \"{domain}\";
        proxy_set_header X-Real-IP $remote_addr;
        proxy_pass  {upstream};
    }}
",
                domain = site.domain,
                upstream = upstream,
            );
        }

        out.push_str("}\n");
        out
    }
}

/// Proxy configurator options
#[derive(Debug, Clone)]
pub struct ProxyOptions {
    /// Directory holding the per-project files
    pub config_dir: PathBuf,
    /// Name of the running proxy container
    pub container: String,
    /// Docker binary used to signal the proxy
    pub docker_binary: String,
    pub template: SiteTemplate,
}

impl Default for ProxyOptions {
    fn default() -> Self {
        Self {
            config_dir: PathBuf::from("/etc/nginx/conf.d/sites"),
            container: "nginx".to_string(),
            docker_binary: "docker".to_string(),
            template: SiteTemplate::default(),
        }
    }
}

/// Writes, removes and activates per-project proxy configuration
#[derive(Clone)]
pub struct ProxyConfigurator {
    runner: Arc<dyn CommandRunner>,
    options: ProxyOptions,
}

impl ProxyConfigurator {
    pub fn new(runner: Arc<dyn CommandRunner>, options: ProxyOptions) -> Self {
        Self { runner, options }
    }

    /// The config file of `project_id`
    pub fn site_file(&self, project_id: &str) -> File {
        Dir::new(&self.options.config_dir).file(&format!("{}.conf", project_id))
    }

    /// Render and write the config of `project_id`, then reload the proxy.
    ///
    /// Only the write can fail; a failed reload is reported to `sink` and
    /// the log.
    pub async fn publish(
        &self,
        project_id: &str,
        site: &ProxySite,
        sink: &dyn OutputSink,
    ) -> Result<(), VoltexError> {
        let contents = self.options.template.render(site);
        let file = self.site_file(project_id);
        file.write_string(&contents)
            .await
            .map_err(|e| VoltexError::ProxyError(format!("Failed to write {}: {}", file.path().display(), e)))?;
        info!("Wrote proxy config {} for {}", file.path().display(), site.domain);

        self.reload(sink).await;
        Ok(())
    }

    /// Remove the config of `project_id`. Returns whether a file existed.
    pub async fn remove(&self, project_id: &str) -> Result<bool, VoltexError> {
        let file = self.site_file(project_id);
        let removed = file.delete().await?;
        if removed {
            info!("Deleted proxy config {}", file.path().display());
        }
        Ok(removed)
    }

    /// Signal the proxy to reload its configuration
    pub async fn reload(&self, sink: &dyn OutputSink) {
        let spec = CommandSpec::new(
            &self.options.docker_binary,
            ["exec", self.options.container.as_str(), "nginx", "-s", "reload"],
        );

        match self.runner.run(&spec, sink).await {
            Ok(output) if output.success() => info!("Proxy reloaded"),
            Ok(output) => {
                let message = format!("nginx reload exited with code {:?}", output.code);
                sink.stderr_line(&message);
                error!("{}", message);
            }
            Err(e) => {
                let message = format!("nginx reload failed: {}", e);
                sink.stderr_line(&message);
                error!("{}", message);
            }
        }
    }
}
