//! Database-existence probe
//!
//! Asks MySQL whether a database exists, trying an ordered list of ways to
//! reach the server. The first strategy that finds the database wins.

use sitewarden_common::{database_name_for, CommandRunner, Error, Result};
use std::sync::Arc;
use tracing::debug;

use crate::config::DatabaseProbeConfig;

/// One way of reaching a MySQL server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeStrategy {
    /// Client installed on the host
    Native { client: String, user: String },
    /// Client inside a running container
    Container {
        container: String,
        user: String,
        password: Option<String>,
    },
}

impl ProbeStrategy {
    pub fn name(&self) -> String {
        match self {
            ProbeStrategy::Native { client, .. } => format!("native {}", client),
            ProbeStrategy::Container { container, .. } => format!("container {}", container),
        }
    }

    fn command(&self, database: &str) -> (String, Vec<String>) {
        let query = format!("SHOW DATABASES LIKE '{}';", database);
        match self {
            ProbeStrategy::Native { client, user } => (
                client.clone(),
                vec![format!("-u{}", user), "-N".to_string(), "-e".to_string(), query],
            ),
            ProbeStrategy::Container {
                container,
                user,
                password,
            } => {
                let mut args = vec![
                    "exec".to_string(),
                    container.clone(),
                    "mysql".to_string(),
                    format!("-u{}", user),
                ];
                if let Some(password) = password {
                    args.push(format!("-p{}", password));
                }
                args.extend(["-N".to_string(), "-e".to_string(), query]);
                ("docker".to_string(), args)
            }
        }
    }
}

pub struct DatabaseProbe {
    strategies: Vec<ProbeStrategy>,
    runner: Arc<dyn CommandRunner>,
}

impl DatabaseProbe {
    pub fn new(strategies: Vec<ProbeStrategy>, runner: Arc<dyn CommandRunner>) -> Self {
        Self { strategies, runner }
    }

    /// Native client first, then each configured container in order
    pub fn from_config(config: &DatabaseProbeConfig, runner: Arc<dyn CommandRunner>) -> Self {
        let mut strategies = vec![ProbeStrategy::Native {
            client: config.client.clone(),
            user: config.user.clone(),
        }];
        strategies.extend(config.containers.iter().map(|container| ProbeStrategy::Container {
            container: container.clone(),
            user: config.user.clone(),
            password: config.container_password.clone(),
        }));
        Self::new(strategies, runner)
    }

    pub fn strategies(&self) -> &[ProbeStrategy] {
        &self.strategies
    }

    /// Whether `database` exists.
    ///
    /// `Ok(false)` when at least one strategy reached a server and none
    /// found the database; [`Error::StrategiesExhausted`] when no strategy
    /// could run at all.
    pub async fn database_exists(&self, database: &str) -> Result<bool> {
        let mut attempts = Vec::new();
        let mut answered = false;

        for strategy in &self.strategies {
            let (program, args) = strategy.command(database);
            let args: Vec<&str> = args.iter().map(String::as_str).collect();

            let outcome = self
                .runner
                .run(&program, &args)
                .await
                .and_then(|out| out.into_result(&program));

            match outcome {
                Ok(out) => {
                    if out.stdout.lines().any(|line| line.trim() == database) {
                        debug!("Database {} found via {}", database, strategy.name());
                        return Ok(true);
                    }
                    answered = true;
                }
                Err(e) => {
                    debug!("{} unavailable: {}", strategy.name(), e);
                    attempts.push(format!("{}: {}", strategy.name(), e));
                }
            }
        }

        if answered {
            Ok(false)
        } else {
            Err(Error::StrategiesExhausted { attempts })
        }
    }

    /// Listing annotation for a domain; unreachable servers count as absent
    pub async fn site_has_database(&self, domain: &str) -> bool {
        self.database_exists(&database_name_for(domain))
            .await
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sitewarden_common::ScriptedRunner;

    fn probe(runner: Arc<ScriptedRunner>) -> DatabaseProbe {
        let config = DatabaseProbeConfig {
            containers: vec!["db-primary".to_string(), "db-legacy".to_string()],
            ..DatabaseProbeConfig::default()
        };
        DatabaseProbe::from_config(&config, runner)
    }

    #[test]
    fn test_strategy_order() {
        let names: Vec<String> = probe(Arc::new(ScriptedRunner::new()))
            .strategies()
            .iter()
            .map(|s| s.name())
            .collect();
        assert_eq!(
            names,
            vec!["native mysql", "container db-primary", "container db-legacy"]
        );
    }

    #[tokio::test]
    async fn test_native_hit_stops_chain() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.succeed("mysql", "shop_test\n");
        let probe = probe(runner.clone());

        assert!(probe.database_exists("shop_test").await.unwrap());
        assert_eq!(runner.invocations().len(), 1);
        assert_eq!(
            runner.invocations()[0],
            "mysql -uroot -N -e SHOW DATABASES LIKE 'shop_test';"
        );
    }

    #[tokio::test]
    async fn test_falls_through_to_second_container() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.fail("mysql", "Can't connect to local MySQL server");
        runner.fail("docker exec db-primary", "No such container: db-primary");
        runner.succeed("docker exec db-legacy", "shop_test\n");
        let probe = probe(runner.clone());

        assert!(probe.database_exists("shop_test").await.unwrap());
        assert_eq!(runner.invocations().len(), 3);
        assert_eq!(
            runner.invocations()[2],
            "docker exec db-legacy mysql -uroot -proot -N -e SHOW DATABASES LIKE 'shop_test';"
        );
    }

    #[tokio::test]
    async fn test_absent_when_servers_answer_empty() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.fail("docker", "No such container");
        let probe = probe(runner.clone());

        // LIKE treats '_' as a wildcard; only an exact line counts
        runner.succeed("mysql", "shopXtest\n");
        assert!(!probe.database_exists("shop_test").await.unwrap());
        assert_eq!(runner.invocations().len(), 3);
    }

    #[tokio::test]
    async fn test_all_strategies_fail() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.fail("mysql", "not installed");
        runner.fail("docker", "daemon not running");
        let probe = probe(runner);

        match probe.database_exists("shop_test").await.unwrap_err() {
            Error::StrategiesExhausted { attempts } => {
                assert_eq!(attempts.len(), 3);
                assert!(attempts[0].starts_with("native mysql"));
                assert!(attempts[2].starts_with("container db-legacy"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!probe.site_has_database("shop.test").await);
    }

    #[tokio::test]
    async fn test_site_database_name() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.succeed("mysql", "my_shop_test\n");
        assert!(probe(runner).site_has_database("my-shop.test").await);
    }
}
