use std::path::Path;

/// `database`/`rabbitmq` connection settings (§6). Parsed by hand from a
/// deliberately minimal `key: value` grammar — blank lines and `#` comments
/// ignored, two section headers — rather than pulled in via a generic config
/// crate, matching the source grammar's simplicity.
#[derive(Debug, Clone, Default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

#[derive(Debug, Clone, Default)]
pub struct RabbitMqConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub rabbitmq: RabbitMqConfig,
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::parse(&text))
    }

    pub fn parse(text: &str) -> Self {
        let mut cfg = AppConfig::default();
        let mut section = String::new();

        for raw_line in text.lines() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line.ends_with(':') && !line.contains(' ') {
                section = line.trim_end_matches(':').to_string();
                continue;
            }
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim();

            match section.as_str() {
                "database" => match key {
                    "host" => cfg.database.host = value.to_string(),
                    "port" => cfg.database.port = value.parse().unwrap_or_default(),
                    "user" => cfg.database.user = value.to_string(),
                    "password" => cfg.database.password = value.to_string(),
                    "database" => cfg.database.database = value.to_string(),
                    _ => {}
                },
                "rabbitmq" => match key {
                    "host" => cfg.rabbitmq.host = value.to_string(),
                    "port" => cfg.rabbitmq.port = value.parse().unwrap_or_default(),
                    "user" => cfg.rabbitmq.user = value.to_string(),
                    "password" => cfg.rabbitmq.password = value.to_string(),
                    _ => {}
                },
                _ => {}
            }
        }

        cfg
    }

    pub fn database_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.database.user,
            self.database.password,
            self.database.host,
            self.database.port,
            self.database.database
        )
    }

    pub fn amqp_url(&self) -> String {
        format!(
            "amqp://{}:{}@{}:{}/%2f",
            self.rabbitmq.user, self.rabbitmq.password, self.rabbitmq.host, self.rabbitmq.port
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_two_sections() {
        let text = "\
# comment
database:
  host: db.internal
  port: 5432
  user: app
  password: secret
  database: restaurant

rabbitmq:
  host: mq.internal
  port: 5672
  user: guest
  password: guest
";
        let cfg = AppConfig::parse(text);
        assert_eq!(cfg.database.host, "db.internal");
        assert_eq!(cfg.database.port, 5432);
        assert_eq!(cfg.database.database, "restaurant");
        assert_eq!(cfg.rabbitmq.host, "mq.internal");
        assert_eq!(cfg.rabbitmq.port, 5672);
    }

    #[test]
    fn ignores_blank_lines_and_comments() {
        let text = "database:\n  host: a\n\n# note\n  port: 1\n";
        let cfg = AppConfig::parse(text);
        assert_eq!(cfg.database.host, "a");
        assert_eq!(cfg.database.port, 1);
    }
}
