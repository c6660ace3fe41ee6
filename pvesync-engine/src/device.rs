//! Codecs for the platform's comma-separated device property strings.
//!
//! Every device keeps the properties it does not model in `extra` so that
//! re-encoding a merged device never drops sub-fields nobody declared.

use crate::error::CodecError;
use crate::size::DiskSize;

/// Network card models the platform accepts as `<model>=<mac>` shorthand.
pub const NIC_MODELS: &[&str] = &[
    "e1000",
    "e1000-82540em",
    "e1000-82544gc",
    "e1000-82545em",
    "e1000e",
    "i82551",
    "i82557b",
    "i82559er",
    "ne2k_isa",
    "ne2k_pci",
    "pcnet",
    "rtl8139",
    "virtio",
    "vmxnet3",
];

/// Splits a property string into `(key, value)` pairs. Bare items have no key.
fn properties(s: &str) -> impl Iterator<Item = (Option<&str>, &str)> {
    s.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| match p.split_once('=') {
            Some((k, v)) => (Some(k.trim()), v.trim()),
            None => (None, p),
        })
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, CodecError> {
    value.parse().map_err(|_| CodecError::InvalidProperty {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, CodecError> {
    match value {
        "1" | "on" | "yes" | "true" => Ok(true),
        "0" | "off" | "no" | "false" => Ok(false),
        _ => Err(CodecError::InvalidProperty {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

fn flag(value: bool) -> &'static str {
    if value { "1" } else { "0" }
}

/// Accumulates `key=value` pairs into a property string.
#[derive(Default)]
struct Encoder(String);

impl Encoder {
    fn raw(&mut self, item: &str) {
        if !self.0.is_empty() {
            self.0.push(',');
        }
        self.0.push_str(item);
    }

    fn kv(&mut self, key: &str, value: impl std::fmt::Display) {
        if !self.0.is_empty() {
            self.0.push(',');
        }
        self.0.push_str(&format!("{key}={value}"));
    }

    fn opt(&mut self, key: &str, value: Option<impl std::fmt::Display>) {
        if let Some(v) = value {
            self.kv(key, v);
        }
    }

    fn opt_flag(&mut self, key: &str, value: Option<bool>) {
        if let Some(v) = value {
            self.kv(key, flag(v));
        }
    }

    fn extra(&mut self, extra: &[(String, String)]) {
        for (k, v) in extra {
            self.kv(k, v);
        }
    }

    fn finish(self) -> String {
        self.0
    }
}

/// A `netN` device.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NetworkDevice {
    pub model: String,
    pub mac_address: Option<String>,
    pub bridge: Option<String>,
    pub firewall: Option<bool>,
    pub link_down: Option<bool>,
    pub mtu: Option<u32>,
    pub queues: Option<u32>,
    pub rate_limit: Option<f64>,
    pub tag: Option<u32>,
    pub trunks: Option<Vec<u32>>,
    pub extra: Vec<(String, String)>,
}

impl NetworkDevice {
    pub fn decode(s: &str) -> Result<Self, CodecError> {
        let mut dev = NetworkDevice::default();
        for (key, value) in properties(s) {
            match key {
                None => dev.model = value.to_string(),
                Some("model") => dev.model = value.to_string(),
                Some("macaddr") => dev.mac_address = Some(value.to_string()),
                Some("bridge") => dev.bridge = Some(value.to_string()),
                Some(k @ "firewall") => dev.firewall = Some(parse_bool(k, value)?),
                Some(k @ "link_down") => dev.link_down = Some(parse_bool(k, value)?),
                Some(k @ "mtu") => dev.mtu = Some(parse_num(k, value)?),
                Some(k @ "queues") => dev.queues = Some(parse_num(k, value)?),
                Some(k @ "rate") => dev.rate_limit = Some(parse_num(k, value)?),
                Some(k @ "tag") => dev.tag = Some(parse_num(k, value)?),
                Some(k @ "trunks") => {
                    let trunks = value
                        .split(';')
                        .filter(|t| !t.is_empty())
                        .map(|t| parse_num(k, t))
                        .collect::<Result<Vec<u32>, _>>()?;
                    dev.trunks = Some(trunks);
                }
                Some(k) if NIC_MODELS.contains(&k) => {
                    dev.model = k.to_string();
                    dev.mac_address = Some(value.to_string());
                }
                Some(k) => dev.extra.push((k.to_string(), value.to_string())),
            }
        }

        if dev.model.is_empty() {
            return Err(CodecError::MissingProperty("model"));
        }
        Ok(dev)
    }

    pub fn encode(&self) -> String {
        let mut enc = Encoder::default();
        match &self.mac_address {
            Some(mac) => enc.kv(&self.model, mac),
            None => enc.kv("model", &self.model),
        }
        enc.opt("bridge", self.bridge.as_deref());
        enc.opt_flag("firewall", self.firewall);
        enc.opt_flag("link_down", self.link_down);
        enc.opt("mtu", self.mtu);
        enc.opt("queues", self.queues);
        enc.opt("rate", self.rate_limit);
        enc.opt("tag", self.tag);
        if let Some(trunks) = &self.trunks {
            let joined = trunks
                .iter()
                .map(u32::to_string)
                .collect::<Vec<_>>()
                .join(";");
            enc.kv("trunks", joined);
        }
        enc.extra(&self.extra);
        enc.finish()
    }
}

/// A disk on one of the storage buses.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StorageDevice {
    /// Volume reference, `<datastore>:<volume>` or an absolute path.
    pub file: String,
    pub format: Option<String>,
    pub size: Option<DiskSize>,
    pub media: Option<String>,
    pub aio: Option<String>,
    pub cache: Option<String>,
    pub discard: Option<String>,
    pub serial: Option<String>,
    pub import_from: Option<String>,
    pub backup: Option<bool>,
    pub iothread: Option<bool>,
    pub replicate: Option<bool>,
    pub ssd: Option<bool>,
    pub extra: Vec<(String, String)>,
}

impl StorageDevice {
    pub fn decode(s: &str) -> Result<Self, CodecError> {
        let mut dev = StorageDevice::default();
        for (key, value) in properties(s) {
            match key {
                None | Some("file") | Some("volume") => dev.file = value.to_string(),
                Some("format") => dev.format = Some(value.to_string()),
                Some("size") => dev.size = Some(value.parse()?),
                Some("media") => dev.media = Some(value.to_string()),
                Some("aio") => dev.aio = Some(value.to_string()),
                Some("cache") => dev.cache = Some(value.to_string()),
                Some("discard") => dev.discard = Some(value.to_string()),
                Some("serial") => dev.serial = Some(value.to_string()),
                Some("import-from") => dev.import_from = Some(value.to_string()),
                Some(k @ "backup") => dev.backup = Some(parse_bool(k, value)?),
                Some(k @ "iothread") => dev.iothread = Some(parse_bool(k, value)?),
                Some(k @ "replicate") => dev.replicate = Some(parse_bool(k, value)?),
                Some(k @ "ssd") => dev.ssd = Some(parse_bool(k, value)?),
                Some(k) => dev.extra.push((k.to_string(), value.to_string())),
            }
        }

        if dev.file.is_empty() {
            return Err(CodecError::MissingProperty("file"));
        }
        if dev.format.is_none() {
            dev.format = dev.format_from_extension();
        }
        Ok(dev)
    }

    pub fn encode(&self) -> String {
        let mut enc = Encoder::default();
        enc.raw(&self.file);
        enc.opt("format", self.format.as_deref());
        enc.opt("media", self.media.as_deref());
        enc.opt("size", self.size);
        enc.opt("aio", self.aio.as_deref());
        enc.opt_flag("backup", self.backup);
        enc.opt("cache", self.cache.as_deref());
        enc.opt("discard", self.discard.as_deref());
        enc.opt_flag("iothread", self.iothread);
        enc.opt_flag("replicate", self.replicate);
        enc.opt("serial", self.serial.as_deref());
        enc.opt_flag("ssd", self.ssd);
        enc.opt("import-from", self.import_from.as_deref());
        enc.extra(&self.extra);
        enc.finish()
    }

    /// A drive holding removable media rather than a disk volume.
    pub fn is_cdrom(&self) -> bool {
        self.media.as_deref() == Some("cdrom")
    }

    /// The datastore part of `file`, if it is a `<datastore>:<volume>` reference.
    pub fn datastore_id(&self) -> Option<&str> {
        match self.file.split_once(':') {
            Some((ds, _)) if !ds.is_empty() && !ds.starts_with('/') => Some(ds),
            _ => None,
        }
    }

    fn format_from_extension(&self) -> Option<String> {
        let (_, name) = self.file.rsplit_once('/').unwrap_or(("", &self.file));
        match name.rsplit_once('.')?.1 {
            ext @ ("qcow2" | "raw" | "vmdk") => Some(ext.to_string()),
            _ => None,
        }
    }
}

/// The `cpu` field: emulated type plus feature flags.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CpuEmulation {
    pub cpu_type: Option<String>,
    pub flags: Option<Vec<String>>,
    pub extra: Vec<(String, String)>,
}

impl CpuEmulation {
    pub fn decode(s: &str) -> Result<Self, CodecError> {
        let mut cpu = CpuEmulation::default();
        for (key, value) in properties(s) {
            match key {
                None | Some("cputype") => cpu.cpu_type = Some(value.to_string()),
                Some("flags") => {
                    let flags: Vec<String> = value
                        .split(';')
                        .filter(|f| !f.is_empty())
                        .map(str::to_string)
                        .collect();
                    cpu.flags = (!flags.is_empty()).then_some(flags);
                }
                Some(k) => cpu.extra.push((k.to_string(), value.to_string())),
            }
        }
        Ok(cpu)
    }

    pub fn encode(&self) -> String {
        let mut enc = Encoder::default();
        enc.opt("cputype", self.cpu_type.as_deref());
        if let Some(flags) = &self.flags {
            enc.kv("flags", flags.join(";"));
        }
        enc.extra(&self.extra);
        enc.finish()
    }
}

/// The `vga` field.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VgaDevice {
    pub vga_type: Option<String>,
    pub memory: Option<u32>,
    pub clipboard: Option<String>,
    pub extra: Vec<(String, String)>,
}

impl VgaDevice {
    pub fn decode(s: &str) -> Result<Self, CodecError> {
        let mut vga = VgaDevice::default();
        for (key, value) in properties(s) {
            match key {
                None | Some("type") => vga.vga_type = Some(value.to_string()),
                Some(k @ "memory") => vga.memory = Some(parse_num(k, value)?),
                Some("clipboard") => vga.clipboard = Some(value.to_string()),
                Some(k) => vga.extra.push((k.to_string(), value.to_string())),
            }
        }
        Ok(vga)
    }

    pub fn encode(&self) -> String {
        let mut enc = Encoder::default();
        enc.opt("type", self.vga_type.as_deref());
        enc.opt("memory", self.memory);
        enc.opt("clipboard", self.clipboard.as_deref());
        enc.extra(&self.extra);
        enc.finish()
    }

    pub fn is_blank(&self) -> bool {
        *self == VgaDevice::default()
    }
}

/// The `rng0` field.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RngDevice {
    pub source: Option<String>,
    pub max_bytes: Option<u32>,
    pub period: Option<u32>,
    pub extra: Vec<(String, String)>,
}

impl RngDevice {
    pub fn decode(s: &str) -> Result<Self, CodecError> {
        let mut rng = RngDevice::default();
        for (key, value) in properties(s) {
            match key {
                None | Some("source") => rng.source = Some(value.to_string()),
                Some(k @ "max_bytes") => rng.max_bytes = Some(parse_num(k, value)?),
                Some(k @ "period") => rng.period = Some(parse_num(k, value)?),
                Some(k) => rng.extra.push((k.to_string(), value.to_string())),
            }
        }
        Ok(rng)
    }

    pub fn encode(&self) -> String {
        let mut enc = Encoder::default();
        enc.opt("source", self.source.as_deref());
        enc.opt("max_bytes", self.max_bytes);
        enc.opt("period", self.period);
        enc.extra(&self.extra);
        enc.finish()
    }

    pub fn is_blank(&self) -> bool {
        *self == RngDevice::default()
    }
}
