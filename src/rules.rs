//! Business Rule Table: the 31 known eero request combinations
//!
//! Each row is one real-world order shape (segment x order type x truck roll
//! x product variant) with the service code it provisions. The table is
//! immutable static data; nothing mutates it at runtime.
//!
//! Rows 29-31 (business customers with additional eero devices removing a
//! device or the whole service) are the scenarios the library is currently
//! missing. They are flagged so the rest of the pipeline keeps them apart.

use crate::types::{CustomerStatus, CustomerType, ScenarioType, TruckRoll};
use serde::Serialize;
use std::borrow::Cow;

/// Rules that have no stored template yet and must be surfaced explicitly
pub const MISSING_PRIORITY_IDS: [u16; 3] = [29, 30, 31];

/// Id given to detections synthesized when no catalog rule matched
pub const SYNTHESIZED_RULE_ID: u16 = 999;

/// Product-variant tag of a rule
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum VariantTag {
    Eero,
    EeroPlus,
    EeroSecure,
    EeroAdditional,
    EeroPlusAdditional,
    AddEero,
    AddEeroPlus,
    AddEeroPlusUpgrade,
    AddAdditional,
    RemoveEero,
    RemoveEeroPlus,
    RemoveEeroEeroPlus,
    RemoveDeviceNotGateway,
    RemoveDeviceGateway,
    RemoveEeroServiceDevice,
    RemoveEeroAlongDevice,
}

impl VariantTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            VariantTag::Eero => "eero",
            VariantTag::EeroPlus => "eero_plus",
            VariantTag::EeroSecure => "eero_secure",
            VariantTag::EeroAdditional => "eero_additional",
            VariantTag::EeroPlusAdditional => "eero_plus_additional",
            VariantTag::AddEero => "add_eero",
            VariantTag::AddEeroPlus => "add_eero_plus",
            VariantTag::AddEeroPlusUpgrade => "add_eero_plus_upgrade",
            VariantTag::AddAdditional => "add_additional",
            VariantTag::RemoveEero => "remove_eero",
            VariantTag::RemoveEeroPlus => "remove_eero_plus",
            VariantTag::RemoveEeroEeroPlus => "remove_eero_eero_plus",
            VariantTag::RemoveDeviceNotGateway => "remove_device_not_gateway",
            VariantTag::RemoveDeviceGateway => "remove_device_gateway",
            VariantTag::RemoveEeroServiceDevice => "remove_eero_service_device",
            VariantTag::RemoveEeroAlongDevice => "remove_eero_along_device",
        }
    }

    pub fn is_removal(&self) -> bool {
        self.as_str().contains("remove")
    }

    /// Service code provisioned for this tag
    pub fn service_code(&self) -> &'static str {
        match self {
            VariantTag::Eero | VariantTag::AddEero => "HE008",
            VariantTag::EeroPlus | VariantTag::AddEeroPlus | VariantTag::AddEeroPlusUpgrade => {
                "HE009"
            }
            VariantTag::EeroSecure => "HE010",
            VariantTag::EeroAdditional => "HE008_MULTI",
            VariantTag::EeroPlusAdditional => "HE009_MULTI",
            VariantTag::RemoveEero => "REMOVE_HE008",
            VariantTag::RemoveEeroPlus => "REMOVE_HE009",
            VariantTag::AddAdditional => "ADD_HE008_DEVICE",
            VariantTag::RemoveDeviceNotGateway => "REMOVE_DEVICE_NON_GATEWAY",
            VariantTag::RemoveDeviceGateway => "REMOVE_DEVICE_GATEWAY",
            VariantTag::RemoveEeroServiceDevice | VariantTag::RemoveEeroAlongDevice => {
                "REMOVE_HE008_ALL"
            }
            VariantTag::RemoveEeroEeroPlus => "HE008",
        }
    }
}

/// One catalog row
#[derive(Debug, Clone, Serialize)]
pub struct CombinationRule {
    pub id: u16,
    pub order_type: ScenarioType,
    pub customer_status: CustomerStatus,
    pub segment: CustomerType,
    pub truck_roll: TruckRoll,
    pub variant: VariantTag,
    pub description: Cow<'static, str>,
}

impl CombinationRule {
    pub fn is_missing_priority(&self) -> bool {
        is_missing_priority(self.id)
    }

    pub fn is_synthesized(&self) -> bool {
        self.id == SYNTHESIZED_RULE_ID
    }
}

/// Look up the service code for a rule
pub fn service_code_for(rule: &CombinationRule) -> &'static str {
    rule.variant.service_code()
}

pub fn is_missing_priority(id: u16) -> bool {
    MISSING_PRIORITY_IDS.contains(&id)
}

/// Service code written into adapted documents for a segment/scenario
pub fn segment_service_code(customer: CustomerType, scenario: ScenarioType) -> &'static str {
    match (customer, scenario) {
        (CustomerType::Residential, _) => "HE008",
        (CustomerType::Business, ScenarioType::ChangeOfService) => "BHSY5",
        (CustomerType::Business, ScenarioType::Install) => "BHSY1",
    }
}

/// The full catalog
pub fn rules() -> &'static [CombinationRule] {
    &RULES
}

pub fn rule(id: u16) -> Option<&'static CombinationRule> {
    RULES.iter().find(|r| r.id == id)
}

const fn row(
    id: u16,
    order_type: ScenarioType,
    customer_status: CustomerStatus,
    segment: CustomerType,
    truck_roll: TruckRoll,
    variant: VariantTag,
    description: &'static str,
) -> CombinationRule {
    CombinationRule {
        id,
        order_type,
        customer_status,
        segment,
        truck_roll,
        variant,
        description: Cow::Borrowed(description),
    }
}

use CustomerStatus::*;
use CustomerType::{Business, Residential};
use ScenarioType::{ChangeOfService as Cos, Install};
use TruckRoll::{NotRequired as NoTruck, Required as WithTruck};
use VariantTag::*;

static RULES: [CombinationRule; 31] = [
    // Install - New - Residential
    row(1, Install, New, Residential, WithTruck, Eero, "Install New Residential Truck roll Eero"),
    row(2, Install, New, Residential, WithTruck, EeroPlus, "Install New Residential Truck roll Eero Plus"),
    row(3, Install, New, Residential, NoTruck, Eero, "Install New Residential No Truck roll Eero"),
    row(4, Install, New, Residential, NoTruck, EeroPlus, "Install New Residential No Truck roll Eero Plus"),
    row(5, Install, New, Residential, WithTruck, EeroAdditional, "Install New Residential Truck roll Eero + Additional Eero Device"),
    row(6, Install, New, Residential, WithTruck, EeroPlusAdditional, "Install New Residential Truck roll Eero Plus + Additional Eero Device"),
    row(7, Install, New, Residential, NoTruck, EeroAdditional, "Install New Residential No Truck roll Eero + Additional Eero Device"),
    row(8, Install, New, Residential, NoTruck, EeroPlusAdditional, "Install New Residential No Truck roll Eero Plus + Additional Eero Device"),
    // Install - New - Business
    row(9, Install, New, Business, WithTruck, Eero, "Install New Business Truck roll Eero"),
    row(10, Install, New, Business, NoTruck, Eero, "Install New Business No Truck roll Eero"),
    row(11, Install, New, Business, WithTruck, EeroAdditional, "Install New Business Truck roll Eero + Additional Eero Device"),
    row(12, Install, New, Business, NoTruck, EeroAdditional, "Install New Business No Truck roll Eero + Additional Eero Device"),
    // Change of Service - Existing - Residential
    row(13, Cos, ExistingHsd, Residential, WithTruck, AddEero, "Change of Service Existing HSD customer Residential Truck roll Add Eero Service"),
    row(14, Cos, ExistingHsd, Residential, NoTruck, AddEero, "Change of Service Existing HSD customer Residential No Truck roll Add Eero Service"),
    row(15, Cos, ExistingHsdEero, Residential, NoTruck, RemoveEero, "Change of Service Existing HSD customer with Eero Residential No Truck roll Remove Eero Service"),
    row(16, Cos, ExistingHsdEero, Residential, NoTruck, AddAdditional, "Change of Service Existing HSD customer with Eero Residential No Truck roll Add Additional Eero Device"),
    row(17, Cos, ExistingHsdEeroAdditional, Residential, NoTruck, RemoveDeviceNotGateway, "Change of Service Existing HSD customer with Eero and additional Eero Residential No Truck roll Remove Eero device which is gateway No"),
    row(18, Cos, ExistingHsdEeroAdditional, Residential, NoTruck, RemoveDeviceGateway, "Change of Service Existing HSD customer with Eero and additional Eero Residential No Truck roll Remove Eero device which is gateway Yes"),
    row(19, Cos, ExistingHsdEeroAdditional, Residential, NoTruck, RemoveEeroServiceDevice, "Change of Service Existing HSD customer with Eero and additional Eero Residential No Truck roll Remove Eero service along with Device"),
    row(20, Cos, ExistingHsd, Residential, WithTruck, AddEeroPlus, "Change of Service Existing HSD customer Residential Truck roll Add Eero Plus Service"),
    row(21, Cos, ExistingHsd, Residential, NoTruck, AddEeroPlus, "Change of Service Existing HSD customer Residential No Truck roll Add Eero Plus Service"),
    row(22, Cos, ExistingHsdEeroPlus, Residential, NoTruck, RemoveEeroPlus, "Change of Service Existing HSD customer with Eero Plus Residential No Truck roll Remove Eero Plus Service"),
    row(23, Cos, ExistingHsdEero, Residential, NoTruck, AddEeroPlusUpgrade, "Change of Service Existing HSD customer with Eero Residential No Truck roll Add Eero Plus Service"),
    row(24, Cos, ExistingHsdEeroPlus, Residential, NoTruck, RemoveEeroEeroPlus, "Change of Service Existing HSD customer with Eero Plus Residential No Truck roll Remove Eero and Eero Plus Service"),
    // Change of Service - Existing - Business
    row(25, Cos, ExistingHsd, Business, WithTruck, AddEero, "Change of Service Existing HSD customer Business Truck roll Add Eero Service"),
    row(26, Cos, ExistingHsd, Business, NoTruck, AddEero, "Change of Service Existing HSD customer Business No Truck roll Add Eero Service"),
    row(27, Cos, ExistingHsdEero, Business, NoTruck, RemoveEero, "Change of Service Existing HSD customer with Eero Business No Truck roll Remove Eero Service"),
    row(28, Cos, ExistingHsdEero, Business, NoTruck, AddAdditional, "Change of Service Existing HSD customer with Eero Business No Truck roll Add Additional Eero Device"),
    row(29, Cos, ExistingHsdEeroAdditional, Business, NoTruck, RemoveDeviceNotGateway, "Change of Service Existing HSD customer with Eero and additional Eero Business No Truck roll Remove Eero device which is gateway No"),
    row(30, Cos, ExistingHsdEeroAdditional, Business, NoTruck, RemoveDeviceGateway, "Change of Service Existing HSD customer with Eero and additional Eero Business No Truck roll Remove Eero device which is gateway Yes"),
    row(31, Cos, ExistingHsdEeroAdditional, Business, NoTruck, RemoveEeroAlongDevice, "Change of Service Existing HSD customer with Eero and additional Eero Business No Truck roll Remove Eero service along with Device"),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_has_31_unique_ids() {
        let ids: Vec<u16> = rules().iter().map(|r| r.id).collect();
        assert_eq!(ids.len(), 31);
        assert_eq!(ids, (1..=31).collect::<Vec<u16>>());
    }

    #[test]
    fn test_catalog_shape_counts() {
        let count = |seg: CustomerType, order: ScenarioType| {
            rules()
                .iter()
                .filter(|r| r.segment == seg && r.order_type == order)
                .count()
        };
        assert_eq!(count(Residential, Install), 8);
        assert_eq!(count(Business, Install), 4);
        assert_eq!(count(Residential, Cos), 12);
        assert_eq!(count(Business, Cos), 7);
    }

    #[test]
    fn test_missing_priority_rules_are_business_device_removals() {
        for id in MISSING_PRIORITY_IDS {
            let r = rule(id).unwrap();
            assert!(r.is_missing_priority());
            assert_eq!(r.segment, Business);
            assert_eq!(r.order_type, Cos);
            assert_eq!(r.customer_status, ExistingHsdEeroAdditional);
            assert!(r.variant.is_removal());
        }
        assert!(!rule(28).unwrap().is_missing_priority());
    }

    #[test]
    fn test_service_codes() {
        assert_eq!(service_code_for(rule(1).unwrap()), "HE008");
        assert_eq!(service_code_for(rule(2).unwrap()), "HE009");
        assert_eq!(service_code_for(rule(5).unwrap()), "HE008_MULTI");
        assert_eq!(service_code_for(rule(28).unwrap()), "ADD_HE008_DEVICE");
        assert_eq!(service_code_for(rule(30).unwrap()), "REMOVE_DEVICE_GATEWAY");
        assert_eq!(service_code_for(rule(31).unwrap()), "REMOVE_HE008_ALL");
    }

    #[test]
    fn test_segment_service_code() {
        assert_eq!(segment_service_code(Residential, Install), "HE008");
        assert_eq!(segment_service_code(Business, Cos), "BHSY5");
        assert_eq!(segment_service_code(Business, Install), "BHSY1");
    }

    #[test]
    fn test_unknown_rule_lookup() {
        assert!(rule(0).is_none());
        assert!(rule(SYNTHESIZED_RULE_ID).is_none());
    }
}
