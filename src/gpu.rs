//! Closed device/architecture enums (spec.md §3 "GPU device / architecture").
//!
//! Mirrors the shape of the teacher's `num_enum`-backed on-disk enums
//! (`schema::enums::AttrKind`, `CastOpcode`): a fixed, meaning-bearing
//! integer enum. Device codenames additionally need case-insensitive,
//! multi-alias string resolution, which has no teacher precedent and is
//! modeled as a plain static table instead.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GpuArchitecture {
    Gcn1_0,
    Gcn1_1,
    Gcn1_2,
    Gcn1_4,
    Gcn1_4_1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum GpuDevice {
    Pitcairn,
    Capeverde,
    Tahiti,
    Oland,
    Bonaire,
    Spectre,
    Spooky,
    Kalindi,
    Hainan,
    Hawaii,
    Iceland,
    Tonga,
    Mullins,
    Fiji,
    Carrizo,
    Dummy,
    Goose,
    Horse,
    Stoney,
    Ellesmere,
    Baffin,
    GfxCarrizo,
    Vega10,
    Vega12,
    Vega20,
    Raven,
}

struct DeviceEntry {
    device: GpuDevice,
    arch: GpuArchitecture,
    aliases: &'static [&'static str],
}

static DEVICE_TABLE: &[DeviceEntry] = &[
    DeviceEntry { device: GpuDevice::Pitcairn, arch: GpuArchitecture::Gcn1_0, aliases: &["pitcairn"] },
    DeviceEntry { device: GpuDevice::Capeverde, arch: GpuArchitecture::Gcn1_0, aliases: &["capeverde"] },
    DeviceEntry { device: GpuDevice::Tahiti, arch: GpuArchitecture::Gcn1_0, aliases: &["tahiti"] },
    DeviceEntry { device: GpuDevice::Oland, arch: GpuArchitecture::Gcn1_0, aliases: &["oland"] },
    DeviceEntry { device: GpuDevice::Bonaire, arch: GpuArchitecture::Gcn1_1, aliases: &["bonaire"] },
    DeviceEntry { device: GpuDevice::Spectre, arch: GpuArchitecture::Gcn1_1, aliases: &["spectre"] },
    DeviceEntry { device: GpuDevice::Spooky, arch: GpuArchitecture::Gcn1_1, aliases: &["spooky"] },
    DeviceEntry { device: GpuDevice::Kalindi, arch: GpuArchitecture::Gcn1_1, aliases: &["kalindi"] },
    DeviceEntry { device: GpuDevice::Hainan, arch: GpuArchitecture::Gcn1_0, aliases: &["hainan"] },
    DeviceEntry { device: GpuDevice::Hawaii, arch: GpuArchitecture::Gcn1_1, aliases: &["hawaii"] },
    DeviceEntry { device: GpuDevice::Iceland, arch: GpuArchitecture::Gcn1_2, aliases: &["iceland", "topaz"] },
    DeviceEntry { device: GpuDevice::Tonga, arch: GpuArchitecture::Gcn1_2, aliases: &["tonga"] },
    DeviceEntry { device: GpuDevice::Mullins, arch: GpuArchitecture::Gcn1_1, aliases: &["mullins"] },
    DeviceEntry { device: GpuDevice::Fiji, arch: GpuArchitecture::Gcn1_2, aliases: &["fiji"] },
    DeviceEntry { device: GpuDevice::Carrizo, arch: GpuArchitecture::Gcn1_2, aliases: &["carrizo"] },
    DeviceEntry { device: GpuDevice::Dummy, arch: GpuArchitecture::Gcn1_2, aliases: &["dummy"] },
    DeviceEntry { device: GpuDevice::Goose, arch: GpuArchitecture::Gcn1_2, aliases: &["goose"] },
    DeviceEntry { device: GpuDevice::Horse, arch: GpuArchitecture::Gcn1_2, aliases: &["horse"] },
    DeviceEntry { device: GpuDevice::Stoney, arch: GpuArchitecture::Gcn1_2, aliases: &["stoney"] },
    DeviceEntry { device: GpuDevice::Ellesmere, arch: GpuArchitecture::Gcn1_2, aliases: &["ellesmere", "polaris10"] },
    DeviceEntry { device: GpuDevice::Baffin, arch: GpuArchitecture::Gcn1_2, aliases: &["baffin", "polaris11"] },
    DeviceEntry { device: GpuDevice::GfxCarrizo, arch: GpuArchitecture::Gcn1_2, aliases: &["gfx804"] },
    DeviceEntry { device: GpuDevice::Vega10, arch: GpuArchitecture::Gcn1_4, aliases: &["vega10", "gfx900"] },
    DeviceEntry { device: GpuDevice::Vega12, arch: GpuArchitecture::Gcn1_4, aliases: &["vega12", "gfx904"] },
    DeviceEntry { device: GpuDevice::Vega20, arch: GpuArchitecture::Gcn1_4_1, aliases: &["vega20", "gfx906"] },
    DeviceEntry { device: GpuDevice::Raven, arch: GpuArchitecture::Gcn1_4, aliases: &["raven", "gfx902"] },
];

impl GpuDevice {
    /// Case-insensitive lookup by name or alias (spec.md §3).
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        DEVICE_TABLE
            .iter()
            .find(|entry| entry.aliases.iter().any(|alias| *alias == lower))
            .map(|entry| entry.device)
    }

    #[must_use]
    pub fn architecture(self) -> GpuArchitecture {
        DEVICE_TABLE
            .iter()
            .find(|entry| entry.device == self)
            .map(|entry| entry.arch)
            .expect("every GpuDevice variant has a DEVICE_TABLE entry")
    }

    #[must_use]
    pub fn canonical_name(self) -> &'static str {
        DEVICE_TABLE
            .iter()
            .find(|entry| entry.device == self)
            .map(|entry| entry.aliases[0])
            .expect("every GpuDevice variant has a DEVICE_TABLE entry")
    }
}

impl fmt::Display for GpuDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_name())
    }
}

impl Default for GpuDevice {
    fn default() -> Self {
        GpuDevice::Bonaire
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_aliases_case_insensitively() {
        assert_eq!(GpuDevice::from_name("BONAIRE"), Some(GpuDevice::Bonaire));
        assert_eq!(GpuDevice::from_name("Polaris10"), Some(GpuDevice::Ellesmere));
        assert_eq!(GpuDevice::from_name("not-a-gpu"), None);
    }

    #[test]
    fn maps_device_to_architecture_generation() {
        assert_eq!(GpuDevice::Tahiti.architecture(), GpuArchitecture::Gcn1_0);
        assert_eq!(GpuDevice::Hawaii.architecture(), GpuArchitecture::Gcn1_1);
        assert_eq!(GpuDevice::Fiji.architecture(), GpuArchitecture::Gcn1_2);
        assert_eq!(GpuDevice::Vega20.architecture(), GpuArchitecture::Gcn1_4_1);
    }
}
