use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};

/// Maps a service port to the host it listens on.
///
/// Services live on the same host, so most deployments never install one;
/// an unknown port resolves to loopback.
pub trait AddressResolver: Send + Sync {
    fn lookup(&self, port: u16) -> Option<IpAddr>;
}

impl<F> AddressResolver for F
where
    F: Fn(u16) -> Option<IpAddr> + Send + Sync,
{
    fn lookup(&self, port: u16) -> Option<IpAddr> {
        self(port)
    }
}

/// Resolver that knows no services.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoopbackResolver;

impl AddressResolver for LoopbackResolver {
    fn lookup(&self, _port: u16) -> Option<IpAddr> {
        None
    }
}

/// Fixed port-to-host table.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    hosts: HashMap<u16, IpAddr>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the host for `port`.
    pub fn with(mut self, port: u16, host: IpAddr) -> Self {
        self.hosts.insert(port, host);
        self
    }
}

impl AddressResolver for StaticResolver {
    fn lookup(&self, port: u16) -> Option<IpAddr> {
        self.hosts.get(&port).copied()
    }
}

/// Resolve `port`, falling back to loopback.
pub fn resolve_or_loopback(resolver: &dyn AddressResolver, port: u16) -> IpAddr {
    resolver
        .lookup(port)
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_ports_fall_back_to_loopback() {
        let resolver = StaticResolver::new().with(4000, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)));
        assert_eq!(
            resolve_or_loopback(&resolver, 4000),
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2))
        );
        assert_eq!(
            resolve_or_loopback(&resolver, 4001),
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        );
        assert_eq!(
            resolve_or_loopback(&LoopbackResolver, 4000),
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        );
    }

    #[test]
    fn closures_resolve() {
        let resolver = |port: u16| (port == 7).then_some(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(resolver.lookup(7), Some(IpAddr::V4(Ipv4Addr::UNSPECIFIED)));
        assert_eq!(resolver.lookup(8), None);
    }
}
