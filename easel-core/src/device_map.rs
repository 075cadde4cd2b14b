#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeviceMap {
    ForceCpu,
    Ordinal(usize),
}

impl DeviceMap {
    /// Maps an optional accelerator ordinal from configuration; `None` pins to the CPU.
    pub fn from_gpu(ordinal: Option<usize>) -> Self {
        ordinal.map_or(Self::ForceCpu, Self::Ordinal)
    }
}

impl Default for DeviceMap {
    fn default() -> Self {
        Self::ForceCpu
    }
}

#[cfg(test)]
mod tests {
    use super::DeviceMap;

    #[test]
    fn cpu_unless_an_ordinal_is_given() {
        assert_eq!(DeviceMap::default(), DeviceMap::ForceCpu);
        assert_eq!(DeviceMap::from_gpu(None), DeviceMap::ForceCpu);
        assert_eq!(DeviceMap::from_gpu(Some(1)), DeviceMap::Ordinal(1));
    }
}
