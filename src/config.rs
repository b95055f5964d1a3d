use std::collections::BTreeMap;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;

use crate::error::Error;

/// The four long-lived process kinds. Every instance is identified by a
/// role and a small integer id.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Role {
    Acceptor,
    Client,
    Learner,
    Proposer,
}

impl Role {
    pub fn name(self) -> &'static str {
        match self {
        | Role::Acceptor => "acceptor",
        | Role::Client => "client",
        | Role::Learner => "learner",
        | Role::Proposer => "proposer",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Role {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
        | "acceptor" => Ok(Role::Acceptor),
        | "client" => Ok(Role::Client),
        | "learner" => Ok(Role::Learner),
        | "proposer" => Ok(Role::Proposer),
        | other => Err(Error::Config(format!("unknown role {:?}", other))),
        }
    }
}

/// Static cluster membership, shared by every process. One instance per
/// line: `<role> <id> <host> <port>`. Membership is closed once parsed;
/// the acceptor count and quorum size are derived from it.
#[derive(Clone, Debug)]
pub struct Config {
    instances: BTreeMap<(Role, u64), SocketAddr>,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|error| Error::Config(format!("cannot read {}: {}", path.display(), error)))?;
        Self::parse(&text)
    }

    /// Parse configuration text. Blank lines and `#` comments are skipped;
    /// anything else malformed is fatal.
    pub fn parse(text: &str) -> Result<Self, Error> {
        let mut instances = BTreeMap::new();
        for (index, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue
            }
            let fields = line.split_whitespace().collect::<Vec<_>>();
            let (role, id, host, port) = match fields.as_slice() {
            | [role, id, host, port] => (role, id, host, port),
            | _ => return Err(Error::Config(format!("malformed entry on line {}: {:?}", index + 1, line))),
            };
            let role = role.parse::<Role>()?;
            let id = id.parse::<u64>()
                .map_err(|_| Error::Config(format!("invalid id on line {}: {:?}", index + 1, id)))?;
            let port = port.parse::<u16>()
                .map_err(|_| Error::Config(format!("invalid port on line {}: {:?}", index + 1, port)))?;
            let addr = (*host, port)
                .to_socket_addrs()
                .ok()
                .and_then(|mut addrs| addrs.next())
                .ok_or_else(|| Error::Config(format!("cannot resolve {:?} on line {}", host, index + 1)))?;
            if instances.insert((role, id), addr).is_some() {
                return Err(Error::Config(format!("ambiguous id: {} {} listed twice", role, id)));
            }
        }
        if !instances.keys().any(|(role, _)| *role == Role::Acceptor) {
            return Err(Error::Config("no acceptors listed".to_string()));
        }
        Ok(Config { instances })
    }

    /// Endpoint of one instance, if configured.
    pub fn addr(&self, role: Role, id: u64) -> Option<SocketAddr> {
        self.instances.get(&(role, id)).copied()
    }

    /// All instances of a role, in id order.
    pub fn instances(&self, role: Role) -> impl Iterator<Item = (u64, SocketAddr)> + '_ {
        self.instances
            .range((role, 0)..=(role, u64::MAX))
            .map(|((_, id), addr)| (*id, *addr))
    }

    /// Ids of all instances of a role, ascending.
    pub fn ids(&self, role: Role) -> Vec<u64> {
        self.instances(role).map(|(id, _)| id).collect()
    }

    pub fn acceptor_count(&self) -> usize {
        self.instances(Role::Acceptor).count()
    }

    /// Majority of the static acceptor set.
    pub fn quorum(&self) -> usize {
        self.acceptor_count() / 2 + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEXT: &str = "
        # three acceptors, everything else single
        acceptor 0 127.0.0.1 7100
        acceptor 1 127.0.0.1 7101
        acceptor 2 127.0.0.1 7102
        proposer 0 127.0.0.1 7200
        learner  0 127.0.0.1 7300
        client   0 127.0.0.1 7400
    ";

    #[test]
    fn parses_roles_and_derives_quorum() {
        let config = Config::parse(TEXT).unwrap();
        assert_eq!(config.acceptor_count(), 3);
        assert_eq!(config.quorum(), 2);
        assert_eq!(config.ids(Role::Acceptor), vec![0, 1, 2]);
        assert_eq!(config.ids(Role::Learner), vec![0]);
        assert_eq!(
            config.addr(Role::Proposer, 0).unwrap(),
            "127.0.0.1:7200".parse().unwrap(),
        );
        assert!(config.addr(Role::Proposer, 1).is_none());
    }

    #[test]
    fn quorum_is_majority() {
        for (acceptors, quorum) in [(1, 1), (2, 2), (3, 2), (4, 3), (5, 3)] {
            let text = (0..acceptors)
                .map(|id| format!("acceptor {} 127.0.0.1 {}\n", id, 7100 + id))
                .collect::<String>();
            assert_eq!(Config::parse(&text).unwrap().quorum(), quorum);
        }
    }

    #[test]
    fn rejects_malformed_entry() {
        assert!(matches!(
            Config::parse("acceptor 0 127.0.0.1"),
            Err(Error::Config(_)),
        ));
    }

    #[test]
    fn rejects_unknown_role() {
        assert!(matches!(
            Config::parse("archivist 0 127.0.0.1 7100"),
            Err(Error::Config(_)),
        ));
    }

    #[test]
    fn rejects_duplicate_instance() {
        let text = "
            acceptor 0 127.0.0.1 7100
            acceptor 0 127.0.0.1 7101
        ";
        assert!(matches!(Config::parse(text), Err(Error::Config(_))));
    }

    #[test]
    fn rejects_empty_acceptor_set() {
        assert!(matches!(
            Config::parse("proposer 0 127.0.0.1 7200"),
            Err(Error::Config(_)),
        ));
    }
}
