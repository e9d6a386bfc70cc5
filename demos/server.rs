use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use confbind::{Callbacks, Config, Section};
use serde::Deserialize;

#[derive(Debug, Default, Section)]
struct Main {
    user: String,
    worker_processes: u32,
    #[conf(format = "bytesize")]
    max_body: u64,
    server: Vec<Server>,
    upstream: HashMap<String, Upstream>,
}

#[derive(Debug, Default, Section)]
#[conf(callbacks)]
struct Server {
    #[conf(hook = "unique")]
    name: String,
    listen: Vec<u16>,
    root: String,
    #[conf(format = "duration")]
    keepalive: Duration,
    #[conf(format = "file_mode")]
    mode: u32,
    access: Vec<IpAddr>,
}

impl Callbacks for Server {
    fn init(&mut self) -> Option<Result<(), String>> {
        self.keepalive = Duration::from_secs(75);
        self.mode = 0o644;
        Some(Ok(()))
    }
}

#[derive(Debug, Default, Section)]
struct Upstream {
    servers: Vec<String>,
    weight: HashMap<String, u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Level {
    Error,
    #[default]
    Info,
    Debug,
}
confbind::deserialize_target!(Level);

#[derive(Debug, Default, Section)]
struct Logging {
    level: Level,
    file: String,
}

type Result<T, E = Box<dyn std::error::Error>> = std::result::Result<T, E>;

fn main() -> Result<()> {
    env_logger::init();

    let text = r#"
        # Global settings.
        user www-data;
        worker_processes 4;
        max_body 8M;

        set docroot /var/www;

        server {
            name example.org;
            listen 80 443;
            root $docroot/example;
            access 10.0.0.1 "192.168.1.1";
        }

        server {
            name ${docroot}-test;   // braced form
            listen 8080;
            keepalive 5min;
            mode 0600;
        }

        upstream backend {
            servers a.internal b.internal;
            weight a.internal 3;
        }

        logging {
            level debug;
            file '/var/log/app.log';
        }
"#;

    let mut main = Main::default();
    let mut logging = Logging::default();
    let cfg = Config::from_text("server.conf", text);
    cfg.entry(&mut main)?;
    cfg.directive("logging", &mut logging)?;
    cfg.parse()?;
    let used = cfg.directive_used("logging");
    drop(cfg);

    println!("{:#?}", main);
    println!("logging used: {}: {:#?}", used, logging);
    Ok(())
}
