use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use serde_json::Value;
use std::path::Path;

const IPV4_TABLE: &str = include_str!("../catalogs/ipv4.json");
const IPV6_TABLE: &str = include_str!("../catalogs/ipv6.json");

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub name: String,
    pub carriers: Vec<(String, String)>,
}

/// One probe to create: a (region, carrier, address) triple.
#[derive(Debug, Clone, PartialEq)]
pub struct Leaf<'a> {
    pub region: &'a str,
    pub carrier: &'a str,
    pub address: &'a str,
}

impl Leaf<'_> {
    pub fn task_name(&self) -> String {
        format!("{}{}", self.region, self.carrier)
    }
}

/// Region → carrier → address table, kept in source order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    regions: Vec<Region>,
}

impl Catalog {
    pub fn bundled(family: AddressFamily) -> Result<Self> {
        let raw = match family {
            AddressFamily::Ipv4 => IPV4_TABLE,
            AddressFamily::Ipv6 => IPV6_TABLE,
        };
        Self::from_json(raw).with_context(|| format!("Bundled {:?} catalog is malformed", family))
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read catalog {}", path.display()))?;
        Self::from_json(&content)
            .with_context(|| format!("Failed to parse catalog {}", path.display()))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let root: Value = serde_json::from_str(raw)?;
        let Value::Object(regions) = root else {
            bail!("catalog root must be an object of regions");
        };

        let mut parsed = Vec::with_capacity(regions.len());
        for (region, carriers) in regions {
            let Value::Object(carriers) = carriers else {
                bail!("region '{}' must map carriers to addresses", region);
            };
            let mut entries = Vec::with_capacity(carriers.len());
            for (carrier, address) in carriers {
                match address {
                    Value::String(address) => entries.push((carrier, address)),
                    other => bail!("address for '{}{}' must be a string, got {}", region, carrier, other),
                }
            }
            parsed.push(Region { name: region, carriers: entries });
        }
        Ok(Self { regions: parsed })
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn total(&self) -> usize {
        self.regions.iter().map(|r| r.carriers.len()).sum()
    }

    pub fn leaves(&self) -> Vec<Leaf<'_>> {
        self.regions
            .iter()
            .flat_map(|region| {
                region.carriers.iter().map(move |(carrier, address)| Leaf {
                    region: &region.name,
                    carrier,
                    address,
                })
            })
            .collect()
    }
}
