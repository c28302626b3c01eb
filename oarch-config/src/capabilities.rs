//! `product_capabilities(location) -> Capabilities`: the one pluggable
//! collaborator the core needs for extent-mode detection (`spec.md` §6).
//! The gluster shellout is one concrete implementation of the trait; the
//! core itself never hardcodes it.

use oarch_types::Location;

use crate::command::run_command;

#[derive(Debug, Clone, Copy, Default)]
pub struct Capabilities {
    pub extent_mode: bool,
}

pub trait CapabilityProbe: Send + Sync {
    fn product_capabilities(&self, location: &Location) -> anyhow::Result<Capabilities>;
}

/// Probes a GlusterFS-style distributed volume via
/// `gluster volume get <store> features.shard`; any non-"off" value line
/// means extent mode is on.
#[derive(Debug, Default)]
pub struct GlusterCapabilityProbe;

impl CapabilityProbe for GlusterCapabilityProbe {
    fn product_capabilities(&self, location: &Location) -> anyhow::Result<Capabilities> {
        let mut cmd = std::process::Command::new("gluster");
        cmd.arg("volume").arg("get").arg(location.store_id()).arg("features.shard");
        let output = run_command(cmd)?;
        let extent_mode = output
            .lines()
            .skip(1) // header line
            .any(|line| {
                line.split_whitespace()
                    .nth(1)
                    .map(|value| value != "off")
                    .unwrap_or(false)
            });
        Ok(Capabilities { extent_mode })
    }
}

/// A probe that never shells out, useful for `stub`/`scan` modes or tests
/// run without a gluster deployment.
#[derive(Debug, Clone, Copy)]
pub struct FixedCapabilityProbe(pub Capabilities);

impl CapabilityProbe for FixedCapabilityProbe {
    fn product_capabilities(&self, _location: &Location) -> anyhow::Result<Capabilities> {
        Ok(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_probe_returns_configured_value() {
        let probe = FixedCapabilityProbe(Capabilities { extent_mode: true });
        let loc = Location::new("glusterfs", "store1", "/");
        let caps = probe.product_capabilities(&loc).unwrap();
        assert!(caps.extent_mode);
    }
}
