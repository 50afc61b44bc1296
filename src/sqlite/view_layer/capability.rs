use crate::types::Capability;

/// Layer state the capability answers depend on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct CapabilityInputs {
    pub(crate) spatial_filter: bool,
    pub(crate) has_geometry: bool,
    pub(crate) index_present: bool,
    pub(crate) has_rowid_column: bool,
}

/// Whether `SELECT count(*)` gives the exact filtered count. It does unless a
/// spatial filter would have to be evaluated row by row.
pub(crate) fn supports_fast_count(inputs: &CapabilityInputs) -> bool {
    !inputs.spatial_filter || !inputs.has_geometry || inputs.index_present
}

pub(crate) fn supports_fast_spatial_filter(inputs: &CapabilityInputs) -> bool {
    inputs.index_present
}

pub(crate) fn test_capability(capability: Capability, inputs: &CapabilityInputs) -> bool {
    match capability {
        Capability::FastFeatureCount => supports_fast_count(inputs),
        Capability::FastSpatialFilter => supports_fast_spatial_filter(inputs),
        Capability::RandomRead => inputs.has_rowid_column,
        Capability::StringsAsUtf8 => true,
        Capability::SequentialWrite
        | Capability::RandomWrite
        | Capability::CreateField
        | Capability::DeleteFeature => false,
    }
}

#[cfg(test)]
mod tests {
    use super::{
        CapabilityInputs, supports_fast_count, supports_fast_spatial_filter, test_capability,
    };
    use crate::types::Capability;

    #[test]
    fn fast_count_whenever_fast_spatial_filter_or_no_filter() {
        for bits in 0..16u8 {
            let inputs = CapabilityInputs {
                spatial_filter: bits & 1 != 0,
                has_geometry: bits & 2 != 0,
                index_present: bits & 4 != 0,
                has_rowid_column: bits & 8 != 0,
            };
            if supports_fast_spatial_filter(&inputs) || !inputs.spatial_filter {
                assert!(supports_fast_count(&inputs), "{inputs:?}");
            }
        }
    }

    #[test]
    fn slow_count_only_with_unindexed_spatial_filter() {
        let inputs = CapabilityInputs {
            spatial_filter: true,
            has_geometry: true,
            index_present: false,
            has_rowid_column: true,
        };
        assert!(!test_capability(Capability::FastFeatureCount, &inputs));
        assert!(!test_capability(Capability::FastSpatialFilter, &inputs));
        assert!(test_capability(Capability::RandomRead, &inputs));
    }

    #[test]
    fn views_are_read_only() {
        let inputs = CapabilityInputs::default();
        assert!(test_capability(Capability::StringsAsUtf8, &inputs));
        assert!(!test_capability(Capability::RandomRead, &inputs));
        for capability in [
            Capability::SequentialWrite,
            Capability::RandomWrite,
            Capability::CreateField,
            Capability::DeleteFeature,
        ] {
            assert!(!test_capability(capability, &inputs));
        }
    }
}
