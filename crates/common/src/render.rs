//! Virtual-host configuration rendering
//!
//! Rendering is a pure function of a [`Site`] and a [`RenderContext`]: the
//! same inputs always produce byte-identical text. Writing the artifact and
//! enabling it is the caller's job.

use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::path::{Path, PathBuf};

use crate::types::{Site, SiteType};

/// Host paths the templates refer to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderContext {
    /// Directory holding the PHP-FPM sockets
    pub php_socket_dir: PathBuf,
    /// Directory for per-site access and error logs
    pub log_dir: PathBuf,
    /// Root of the per-domain certificate directories
    pub cert_root: PathBuf,
}

impl Default for RenderContext {
    fn default() -> Self {
        Self {
            php_socket_dir: PathBuf::from("/var/run/php"),
            log_dir: PathBuf::from("/var/log/nginx"),
            cert_root: PathBuf::from("/etc/letsencrypt/live"),
        }
    }
}

impl RenderContext {
    /// PHP-FPM socket for an optional runtime version
    pub fn php_socket(&self, version: Option<&str>) -> PathBuf {
        match version {
            Some(v) => self.php_socket_dir.join(format!("php{}-fpm.sock", v)),
            None => self.php_socket_dir.join("php-fpm.sock"),
        }
    }

    /// Certificate directory for a domain
    pub fn cert_dir(&self, domain: &str) -> PathBuf {
        self.cert_root.join(domain)
    }
}

impl SiteType {
    /// Directory served by the web server, `None` when nothing is served
    /// from disk
    pub fn document_root(&self, web_root: &Path) -> Option<PathBuf> {
        match self {
            SiteType::StaticPhp => Some(web_root.to_path_buf()),
            SiteType::FrameworkPhp => Some(web_root.join("public")),
            SiteType::ReverseProxy => None,
        }
    }
}

const MARKER: &str = "# sitewarden";

/// Render the plain (port `listen_port`) vhost for a site
pub fn render(site: &Site, ctx: &RenderContext) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} {} {}", MARKER, site.site_type, site.domain);
    out.push_str("server {\n");
    let _ = writeln!(out, "    listen {};", site.listen_port);
    let _ = writeln!(out, "    listen [::]:{};", site.listen_port);
    write_server_body(&mut out, site, ctx);
    out.push_str("}\n");
    out
}

/// Render the TLS variant (port 443) vhost for a site.
///
/// Certificate paths follow the `{cert_root}/{domain}/` convention.
pub fn render_tls(site: &Site, ctx: &RenderContext) -> String {
    let cert_dir = ctx.cert_dir(&site.domain);
    let mut out = String::new();
    let _ = writeln!(out, "{} {} {} tls", MARKER, site.site_type, site.domain);
    out.push_str("server {\n");
    out.push_str("    listen 443 ssl;\n");
    out.push_str("    listen [::]:443 ssl;\n");
    out.push_str("    http2 on;\n");
    let _ = writeln!(out, "    ssl_certificate {};", cert_dir.join("fullchain.pem").display());
    let _ = writeln!(out, "    ssl_certificate_key {};", cert_dir.join("privkey.pem").display());
    out.push_str("    ssl_protocols TLSv1.2 TLSv1.3;\n");
    out.push_str("    ssl_prefer_server_ciphers on;\n");
    out.push_str("    add_header Strict-Transport-Security \"max-age=31536000; includeSubDomains\" always;\n");
    write_server_body(&mut out, site, ctx);
    out.push_str("}\n");
    out
}

fn write_server_body(out: &mut String, site: &Site, ctx: &RenderContext) {
    let _ = writeln!(out, "    server_name {} www.{};", site.domain, site.domain);
    match site.site_type {
        SiteType::StaticPhp | SiteType::FrameworkPhp => {
            if let Some(root) = site.site_type.document_root(&site.web_root) {
                let _ = writeln!(out, "    root {};", root.display());
            }
            out.push_str("    index index.php index.html index.htm;\n");
            write_logs(out, site, ctx);
            write_php_locations(out, site, ctx);
        }
        SiteType::ReverseProxy => {
            write_logs(out, site, ctx);
            write_proxy_location(out, site);
        }
    }
}

fn write_logs(out: &mut String, site: &Site, ctx: &RenderContext) {
    out.push('\n');
    let _ = writeln!(
        out,
        "    access_log {};",
        ctx.log_dir.join(format!("{}.access.log", site.domain)).display()
    );
    let _ = writeln!(
        out,
        "    error_log {};",
        ctx.log_dir.join(format!("{}.error.log", site.domain)).display()
    );
}

fn write_php_locations(out: &mut String, site: &Site, ctx: &RenderContext) {
    let socket = ctx.php_socket(site.php_runtime_version.as_deref());
    out.push_str("\n    location / {\n");
    out.push_str("        try_files $uri $uri/ /index.php?$query_string;\n");
    out.push_str("    }\n\n");
    out.push_str("    location ~ \\.php$ {\n");
    let _ = writeln!(out, "        fastcgi_pass unix:{};", socket.display());
    out.push_str("        fastcgi_param SCRIPT_FILENAME $document_root$fastcgi_script_name;\n");
    out.push_str("        include fastcgi_params;\n");
    out.push_str("    }\n\n");
    out.push_str("    location ~ /\\.ht {\n");
    out.push_str("        deny all;\n");
    out.push_str("    }\n");
}

fn write_proxy_location(out: &mut String, site: &Site) {
    out.push_str("\n    location / {\n");
    let _ = writeln!(out, "        proxy_pass http://127.0.0.1:{};", site.backend_port);
    out.push_str("        proxy_http_version 1.1;\n");
    out.push_str("        proxy_set_header Upgrade $http_upgrade;\n");
    out.push_str("        proxy_set_header Connection 'upgrade';\n");
    out.push_str("        proxy_set_header Host $host;\n");
    out.push_str("        proxy_cache_bypass $http_upgrade;\n");
    out.push_str("        proxy_set_header X-Real-IP $remote_addr;\n");
    out.push_str("        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;\n");
    out.push_str("    }\n");
}

/// Fields recovered from rendered vhost text
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RenderedFields {
    pub domain: Option<String>,
    pub site_type: Option<SiteType>,
    pub listen_port: Option<u16>,
    pub backend_port: Option<u16>,
    pub php_runtime_version: Option<String>,
    pub document_root: Option<PathBuf>,
    pub tls: bool,
}

impl RenderedFields {
    /// Web root implied by the document root and site type
    pub fn web_root(&self) -> Option<PathBuf> {
        let root = self.document_root.as_ref()?;
        match self.site_type {
            Some(SiteType::FrameworkPhp) => root.parent().map(Path::to_path_buf),
            _ => Some(root.clone()),
        }
    }
}

/// Recover the encoded fields from vhost text.
///
/// Understands text produced by [`render`] and [`render_tls`], and makes a
/// best effort on hand-written nginx server blocks.
pub fn parse_rendered(text: &str) -> RenderedFields {
    let mut fields = RenderedFields::default();

    for line in text.lines() {
        let line = line.trim();

        if let Some(rest) = line.strip_prefix(MARKER) {
            let mut parts = rest.split_whitespace();
            fields.site_type = parts.next().map(SiteType::from_label);
            if fields.domain.is_none() {
                fields.domain = parts.next().map(str::to_string);
            }
            fields.tls = parts.next() == Some("tls");
            continue;
        }

        let Some(directive) = line.strip_suffix(';') else {
            continue;
        };
        let mut words = directive.split_whitespace();
        match (words.next(), words.next()) {
            (Some("listen"), Some(addr)) if fields.listen_port.is_none() => {
                fields.listen_port = addr.rsplit(':').next().and_then(|p| p.parse().ok());
            }
            (Some("server_name"), Some(name)) if fields.domain.is_none() => {
                fields.domain = Some(name.to_string());
            }
            (Some("root"), Some(root)) => {
                fields.document_root = Some(PathBuf::from(root));
            }
            (Some("proxy_pass"), Some(target)) => {
                fields.backend_port = target
                    .trim_end_matches('/')
                    .rsplit(':')
                    .next()
                    .and_then(|p| p.parse().ok());
            }
            (Some("fastcgi_pass"), Some(target)) => {
                fields.php_runtime_version = php_version_from_socket(target);
            }
            (Some("ssl_certificate"), Some(_)) => {
                fields.tls = true;
            }
            _ => {}
        }
    }

    if fields.site_type.is_none() {
        fields.site_type = Some(if fields.backend_port.is_some() {
            SiteType::ReverseProxy
        } else if fields
            .document_root
            .as_ref()
            .is_some_and(|r| r.file_name().is_some_and(|n| n == "public"))
        {
            SiteType::FrameworkPhp
        } else {
            SiteType::StaticPhp
        });
    }

    fields
}

fn php_version_from_socket(target: &str) -> Option<String> {
    let file = target.rsplit('/').next()?;
    let version = file.strip_prefix("php")?.strip_suffix("-fpm.sock")?;
    if version.is_empty() {
        None
    } else {
        Some(version.to_string())
    }
}
