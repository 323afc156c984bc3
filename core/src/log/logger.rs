use super::LogError;
use log::LevelFilter;
use log4rs::config::Logger;
use std::{collections::BTreeMap, env};

/// Module level overrides collected from a filter expression such as
/// `"info,blockstream_connectionmanager=debug"`
pub(super) struct Loggers {
    loggers: BTreeMap<String, LevelFilter>,
    root_level: LevelFilter,
}

impl Loggers {
    pub fn root_level(&self) -> LevelFilter {
        self.root_level
    }

    /// log4rs loggers inheriting the root appenders
    pub fn items(&self) -> impl Iterator<Item = Logger> + '_ {
        self.loggers.iter().map(|(name, level)| Logger::builder().build(name.clone(), *level))
    }

    #[cfg(test)]
    pub fn level_of(&self, name: &str) -> Option<LevelFilter> {
        self.loggers.get(name).copied()
    }
}

pub(super) struct Builder {
    loggers: BTreeMap<String, LevelFilter>,
    root_level: LevelFilter,
}

impl Builder {
    pub fn new(default_root_level: LevelFilter) -> Self {
        Self { loggers: BTreeMap::new(), root_level: default_root_level }
    }

    pub fn parse_env(&mut self, env: &str) -> &mut Self {
        self.parse_expression(&env::var(env).unwrap_or_default())
    }

    /// Applies a comma separated list of `level` or `module=level` specs. Invalid specs are reported and skipped.
    pub fn parse_expression(&mut self, expression: &str) -> &mut Self {
        for spec in expression.split(',').map(str::trim).filter(|spec| !spec.is_empty()) {
            if let Err(err) = self.parse_spec(spec) {
                eprintln!("Ignoring invalid logging spec: {err}");
            }
        }
        self
    }

    fn parse_spec(&mut self, spec: &str) -> Result<(), LogError> {
        let mut parts = spec.split('=').map(str::trim);
        match (parts.next(), parts.next(), parts.next()) {
            // A lone level sets the root, a lone module name enables everything for that module
            (Some(part), None, None) => match part.parse() {
                Ok(level) => self.root_level = level,
                Err(_) => {
                    self.loggers.insert(part.to_owned(), LevelFilter::max());
                }
            },
            (Some(name), Some(""), None) => {
                self.loggers.insert(name.to_owned(), LevelFilter::max());
            }
            (Some(name), Some(level), None) => {
                let level = level.parse().map_err(|_| LogError::ParseLoggerSpecError(spec.to_owned()))?;
                self.loggers.insert(name.to_owned(), level);
            }
            _ => return Err(LogError::ParseLoggerSpecError(spec.to_owned())),
        }
        Ok(())
    }

    pub fn build(&mut self) -> Loggers {
        Loggers { loggers: std::mem::take(&mut self.loggers), root_level: self.root_level }
    }
}
