use ipnetwork::Ipv4Network;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

const MAX_HOSTNAME_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;
const LIST_SEPARATORS: [char; 2] = [',', '\n'];

/// Raw target input, resolved once into one of its three shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSpec {
    Single(String),
    List(Vec<String>),
    File(PathBuf),
}

impl TargetSpec {
    /// An existing file wins, then a separated list, then a single literal.
    pub fn parse(input: &str) -> Self {
        let input = input.trim();

        if Path::new(input).is_file() {
            return TargetSpec::File(PathBuf::from(input));
        }

        if input.contains(LIST_SEPARATORS) {
            let entries = input
                .split(LIST_SEPARATORS)
                .map(str::trim)
                .filter(|entry| !entry.is_empty())
                .map(String::from)
                .collect();
            return TargetSpec::List(entries);
        }

        TargetSpec::Single(input.to_string())
    }

    pub fn from_args(args: &[String]) -> Self {
        match args {
            [single] => Self::parse(single),
            many => TargetSpec::List(
                many.iter()
                    .flat_map(|arg| arg.split(LIST_SEPARATORS))
                    .map(str::trim)
                    .filter(|entry| !entry.is_empty())
                    .map(String::from)
                    .collect(),
            ),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            TargetSpec::Single(value) => value.clone(),
            TargetSpec::List(values) => format!("{} entries", values.len()),
            TargetSpec::File(path) => path.display().to_string(),
        }
    }
}

/// One unit of probe work.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    Ip(IpAddr),
    Host(String),
}

impl Target {
    /// `host:port`, with IPv6 addresses bracketed.
    pub fn authority(&self, port: u16) -> String {
        format!("{}:{}", self.url_host(), port)
    }

    pub fn url_host(&self) -> String {
        match self {
            Target::Ip(IpAddr::V6(ip)) => format!("[{}]", ip),
            Target::Ip(ip) => ip.to_string(),
            Target::Host(host) => host.clone(),
        }
    }

    pub fn ip(&self) -> Option<IpAddr> {
        match self {
            Target::Ip(ip) => Some(*ip),
            Target::Host(_) => None,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Ip(ip) => write!(f, "{}", ip),
            Target::Host(host) => f.write_str(host),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Entry {
    Network(Ipv4Network),
    Address(IpAddr),
    Host(String),
}

impl Entry {
    fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();

        if let Some((addr, prefix)) = raw.split_once('/') {
            let addr: Ipv4Addr = addr
                .parse()
                .map_err(|_| format!("'{}' is not an IPv4 network", raw))?;
            let prefix: u8 = prefix
                .parse()
                .map_err(|_| format!("'{}' has an invalid prefix length", raw))?;
            let network = Ipv4Network::new(addr, prefix)
                .map_err(|e| format!("'{}' is not a valid network: {}", raw, e))?;
            return Ok(Entry::Network(network));
        }

        match raw.parse::<IpAddr>() {
            Ok(IpAddr::V4(addr)) => {
                let network = Ipv4Network::new(addr, 32)
                    .map_err(|e| format!("'{}' is not a valid address: {}", raw, e))?;
                Ok(Entry::Network(network))
            }
            Ok(addr) => Ok(Entry::Address(addr)),
            Err(_) if is_hostname(raw) => Ok(Entry::Host(raw.to_string())),
            Err(_) => Err(format!("'{}' is neither a network, an address nor a hostname", raw)),
        }
    }

    fn size(&self) -> u64 {
        match self {
            Entry::Network(network) => network_size(network),
            Entry::Address(_) | Entry::Host(_) => 1,
        }
    }
}

fn network_size(network: &Ipv4Network) -> u64 {
    1u64 << (32 - u32::from(network.prefix()))
}

fn is_hostname(value: &str) -> bool {
    let value = value.strip_suffix('.').unwrap_or(value);
    if value.is_empty() || value.len() > MAX_HOSTNAME_LEN {
        return false;
    }

    value.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= MAX_LABEL_LEN
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    })
}

/// Entry totals from a counting pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TargetCensus {
    pub targets: u64,
    pub entries: u64,
    pub invalid: u64,
}

/// Lazy, restartable expansion of a `TargetSpec`.
///
/// Every call to [`TargetSource::iter`] starts from the beginning of the
/// spec. Networks are walked address by address and files are read line by
/// line, so a /8 never sits in memory.
#[derive(Debug, Clone)]
pub struct TargetSource {
    spec: TargetSpec,
}

impl TargetSource {
    pub fn new(spec: TargetSpec) -> Self {
        log::debug!("[target] new: spec={:?}", spec);
        Self { spec }
    }

    pub fn spec(&self) -> &TargetSpec {
        &self.spec
    }

    pub fn iter(&self) -> Targets {
        Targets {
            entries: self.entries(),
            current: None,
        }
    }

    pub fn count(&self) -> u64 {
        self.census().targets
    }

    pub fn census(&self) -> TargetCensus {
        let mut census = TargetCensus::default();

        for raw in self.entries() {
            census.entries += 1;
            match Entry::parse(&raw) {
                Ok(entry) => census.targets += entry.size(),
                Err(reason) => {
                    log::debug!("[target] census_invalid_entry: reason={}", reason);
                    census.invalid += 1;
                }
            }
        }

        log::debug!("[target] census: targets={} entries={} invalid={}",
            census.targets, census.entries, census.invalid);
        census
    }

    fn entries(&self) -> Box<dyn Iterator<Item = String> + Send> {
        match &self.spec {
            TargetSpec::Single(value) => Box::new(std::iter::once(value.clone())),
            TargetSpec::List(values) => Box::new(values.clone().into_iter()),
            TargetSpec::File(path) => match File::open(path) {
                Ok(file) => Box::new(file_entries(path.clone(), file)),
                Err(e) => {
                    log::warn!("[target] file_unreadable: path={} error={}", path.display(), e);
                    Box::new(std::iter::empty())
                }
            },
        }
    }
}

fn file_entries(path: PathBuf, file: File) -> impl Iterator<Item = String> + Send {
    BufReader::new(file)
        .lines()
        .map_while(move |line| match line {
            Ok(line) => Some(line),
            Err(e) => {
                log::warn!("[target] file_read_failed: path={} error={}", path.display(), e);
                None
            }
        })
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
}

/// Iterator returned by [`TargetSource::iter`].
pub struct Targets {
    entries: Box<dyn Iterator<Item = String> + Send>,
    current: Option<AddressRange>,
}

impl Iterator for Targets {
    type Item = Target;

    fn next(&mut self) -> Option<Target> {
        loop {
            if let Some(range) = self.current.as_mut() {
                if let Some(addr) = range.next() {
                    return Some(Target::Ip(IpAddr::V4(addr)));
                }
                self.current = None;
            }

            let raw = self.entries.next()?;
            match Entry::parse(&raw) {
                Ok(Entry::Network(network)) => self.current = Some(AddressRange::new(&network)),
                Ok(Entry::Address(addr)) => return Some(Target::Ip(addr)),
                Ok(Entry::Host(host)) => return Some(Target::Host(host)),
                Err(reason) => log::warn!("[target] invalid_entry_skipped: reason={}", reason),
            }
        }
    }
}

/// Ascending walk over one IPv4 network. Bounds are u64 so a /0 fits.
struct AddressRange {
    next: u64,
    end: u64,
}

impl AddressRange {
    fn new(network: &Ipv4Network) -> Self {
        let start = u64::from(u32::from(network.network()));
        Self {
            next: start,
            end: start + network_size(network),
        }
    }
}

impl Iterator for AddressRange {
    type Item = Ipv4Addr;

    fn next(&mut self) -> Option<Ipv4Addr> {
        if self.next >= self.end {
            return None;
        }
        let addr = Ipv4Addr::from(self.next as u32);
        self.next += 1;
        Some(addr)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.end - self.next) as usize;
        (remaining, Some(remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::Ipv6Addr;
    use tempfile::NamedTempFile;

    fn collect(spec: TargetSpec) -> Vec<String> {
        TargetSource::new(spec).iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_parse_single_literal() {
        assert_eq!(TargetSpec::parse("example.com"), TargetSpec::Single("example.com".to_string()));
        assert_eq!(TargetSpec::parse(" 10.0.0.0/8 "), TargetSpec::Single("10.0.0.0/8".to_string()));
    }

    #[test]
    fn test_parse_list() {
        let spec = TargetSpec::parse("1.1.1.1, example.com,,\n8.8.8.8");
        assert_eq!(spec, TargetSpec::List(vec![
            "1.1.1.1".to_string(),
            "example.com".to_string(),
            "8.8.8.8".to_string(),
        ]));
    }

    #[test]
    fn test_parse_existing_file() {
        let file = NamedTempFile::new().unwrap();
        let path = file.path().to_string_lossy().to_string();
        assert_eq!(TargetSpec::parse(&path), TargetSpec::File(file.path().to_path_buf()));
    }

    #[test]
    fn test_from_args_multiple() {
        let args = vec!["1.1.1.1".to_string(), "a.com,b.com".to_string()];
        assert_eq!(TargetSpec::from_args(&args), TargetSpec::List(vec![
            "1.1.1.1".to_string(),
            "a.com".to_string(),
            "b.com".to_string(),
        ]));
    }

    #[test]
    fn test_cidr_expands_in_order() {
        let targets = collect(TargetSpec::Single("93.184.216.0/30".to_string()));
        assert_eq!(targets, vec!["93.184.216.0", "93.184.216.1", "93.184.216.2", "93.184.216.3"]);
    }

    #[test]
    fn test_cidr_host_bits_are_masked() {
        let targets = collect(TargetSpec::Single("10.0.0.6/30".to_string()));
        assert_eq!(targets, vec!["10.0.0.4", "10.0.0.5", "10.0.0.6", "10.0.0.7"]);
    }

    #[test]
    fn test_bare_address_is_single_host() {
        let source = TargetSource::new(TargetSpec::Single("8.8.8.8".to_string()));
        assert_eq!(source.count(), 1);
        assert_eq!(source.iter().collect::<Vec<_>>(), vec![Target::Ip("8.8.8.8".parse().unwrap())]);
    }

    #[test]
    fn test_ipv6_literal() {
        let source = TargetSource::new(TargetSpec::Single("2001:db8::1".to_string()));
        let targets: Vec<_> = source.iter().collect();
        assert_eq!(targets, vec![Target::Ip(IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1)))]);
        assert_eq!(targets[0].authority(443), "[2001:db8::1]:443");
        assert_eq!(source.count(), 1);
    }

    #[test]
    fn test_count_matches_expansion() {
        for spec in ["10.1.2.3/32", "10.1.2.0/31", "10.1.2.0/30", "10.1.2.0/28", "10.1.0.0/22", "192.168.0.0/20"] {
            let source = TargetSource::new(TargetSpec::Single(spec.to_string()));
            assert_eq!(source.count(), source.iter().count() as u64, "spec {}", spec);
        }
    }

    #[test]
    fn test_huge_network_is_lazy() {
        let source = TargetSource::new(TargetSpec::Single("10.0.0.0/8".to_string()));
        assert_eq!(source.count(), 16_777_216);

        let first: Vec<_> = source.iter().take(3).map(|t| t.to_string()).collect();
        assert_eq!(first, vec!["10.0.0.0", "10.0.0.1", "10.0.0.2"]);
    }

    #[test]
    fn test_whole_address_space_count() {
        let source = TargetSource::new(TargetSpec::Single("0.0.0.0/0".to_string()));
        assert_eq!(source.count(), 1u64 << 32);
        let mut range = AddressRange::new(&"0.0.0.0/0".parse().unwrap());
        range.next = range.end - 1;
        assert_eq!(range.next(), Some(Ipv4Addr::new(255, 255, 255, 255)));
        assert_eq!(range.next(), None);
    }

    #[test]
    fn test_mixed_spec_skips_invalid() {
        let spec = TargetSpec::List(vec![
            "10.0.0.0/30".to_string(),
            "example.com".to_string(),
            "not a target!".to_string(),
        ]);
        let source = TargetSource::new(spec);

        let census = source.census();
        assert_eq!(census.targets, 5);
        assert_eq!(census.entries, 3);
        assert_eq!(census.invalid, 1);
        assert_eq!(source.iter().count(), 5);
    }

    #[test]
    fn test_invalid_networks() {
        for raw in ["10.0.0.0/33", "10.0.0/24", "2001:db8::/64", "10.0.0.0/abc", "-bad-.com", "a..b"] {
            assert!(Entry::parse(raw).is_err(), "{} should be invalid", raw);
        }
    }

    #[test]
    fn test_hostname_entries() {
        assert_eq!(Entry::parse("not-an-ip-not-resolvable"), Ok(Entry::Host("not-an-ip-not-resolvable".to_string())));
        assert_eq!(Entry::parse("Example.COM."), Ok(Entry::Host("Example.COM.".to_string())));
        assert_eq!(Entry::parse("_dmarc.example.com"), Ok(Entry::Host("_dmarc.example.com".to_string())));
    }

    #[test]
    fn test_hostnames_are_yielded_verbatim() {
        let targets = collect(TargetSpec::parse("Example.COM.,cdn.Example.net"));
        assert_eq!(targets, vec!["Example.COM.", "cdn.Example.net"]);
    }

    #[test]
    fn test_file_entries_one_level() {
        let inner = NamedTempFile::new().unwrap();
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "8.8.8.8").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "# resolvers").unwrap();
        writeln!(file, "  1.1.1.1  ").unwrap();
        writeln!(file, "10.0.0.0/31").unwrap();
        writeln!(file, "{}", inner.path().display()).unwrap();

        let source = TargetSource::new(TargetSpec::File(file.path().to_path_buf()));
        let targets: Vec<_> = source.iter().map(|t| t.to_string()).collect();

        // The nested path is not a hostname, so it is skipped rather than read.
        assert_eq!(targets, vec!["8.8.8.8", "1.1.1.1", "10.0.0.0", "10.0.0.1"]);
        assert_eq!(source.count(), 4);
    }

    #[test]
    fn test_source_is_restartable() {
        let source = TargetSource::new(TargetSpec::Single("172.16.0.0/29".to_string()));
        let first: Vec<_> = source.iter().collect();
        let second: Vec<_> = source.iter().collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 8);
    }

    #[test]
    fn test_missing_file_yields_nothing() {
        let source = TargetSource::new(TargetSpec::File(PathBuf::from("/nonexistent/targets.txt")));
        assert_eq!(source.count(), 0);
        assert_eq!(source.iter().count(), 0);
    }

    #[test]
    fn test_empty_list() {
        let source = TargetSource::new(TargetSpec::List(Vec::new()));
        assert_eq!(source.census(), TargetCensus::default());
        assert_eq!(source.iter().next(), None);
    }
}
