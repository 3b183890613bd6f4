use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Entity snapshot as delivered by the context broker. Properties keep
/// their wire shape; use [`PropertyValue::decode`] to read them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub id: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(flatten)]
    pub properties: Map<String, Value>
}

impl EntitySnapshot {
    pub fn property(&self, name: &str) -> PropertyValue {
        PropertyValue::decode(&self.properties, name)
    }
}

/// A broker property is either a bare value or a one-level `{value: …}`
/// wrapper. Decoding is explicit so absence never panics downstream.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Absent,
    Bare(Value),
    Wrapped(Value)
}

impl PropertyValue {
    pub fn decode(properties: &Map<String, Value>, name: &str) -> Self {
        match properties.get(name) {
            None | Some(Value::Null) => Self::Absent,
            Some(Value::Object(object)) => {
                if let Some(inner) = object.get("value").or_else(|| object.get("@value")) {
                    Self::Wrapped(inner.clone())
                } else {
                    Self::Bare(Value::Object(object.clone()))
                }
            }
            Some(value) => Self::Bare(value.clone())
        }
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Absent => None,
            Self::Bare(value) | Self::Wrapped(value) => Some(value)
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.value().and_then(Value::as_str)
    }

    pub fn as_object(&self) -> Option<&Map<String, Value>> {
        self.value().and_then(Value::as_object)
    }
}

/// ERP schema an external entity type maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Product,
    Equipment,
    Meter,
    Installation,
    Partner
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Product => "product",
            Self::Equipment => "equipment",
            Self::Meter => "meter",
            Self::Installation => "installation",
            Self::Partner => "partner"
        }
    }
}

/// Entity types the engine synchronizes, in sweep order.
pub const SYNCED_TYPES: &[&str] = &[
    "AgriParcel",
    "Device",
    "Building",
    "EnergyMeter",
    "SolarPanel",
    "WeatherStation"
];

/// Routes a declared entity type to its record kind. The table is closed:
/// unknown types are the caller's `UnsupportedType` error.
pub fn classify(entity_type: &str) -> Option<RecordKind> {
    match entity_type {
        "AgriParcel" => Some(RecordKind::Product),
        "Device" | "WeatherStation" => Some(RecordKind::Equipment),
        "EnergyMeter" => Some(RecordKind::Meter),
        "SolarPanel" => Some(RecordKind::Installation),
        "Building" => Some(RecordKind::Partner),
        _ => None
    }
}

/// Pure transform from a snapshot to ERP field values. Always emits the
/// base `name`/`external_id` pair; missing properties yield missing fields,
/// never errors.
pub fn transform(snapshot: &EntitySnapshot, kind: RecordKind) -> Map<String, Value> {
    let mut fields = Map::new();

    let name = snapshot
        .property("name")
        .as_str()
        .map_or_else(|| snapshot.id.clone(), String::from);
    fields.insert("name".to_string(), Value::String(name));
    fields.insert("external_id".to_string(), Value::String(snapshot.id.clone()));

    match kind {
        RecordKind::Product => transform_parcel(snapshot, &mut fields),
        RecordKind::Equipment => transform_device(snapshot, &mut fields),
        RecordKind::Meter => transform_meter(snapshot, &mut fields),
        RecordKind::Installation => transform_installation(snapshot, &mut fields),
        RecordKind::Partner => transform_partner(snapshot, &mut fields)
    }

    fields
}

fn insert_property(fields: &mut Map<String, Value>, field: &str, property: &PropertyValue) {
    if let Some(value) = property.value() {
        fields.insert(field.to_string(), value.clone());
    }
}

fn transform_parcel(snapshot: &EntitySnapshot, fields: &mut Map<String, Value>) {
    insert_property(fields, "description", &snapshot.property("description"));
    insert_property(fields, "area", &snapshot.property("area"));
    insert_property(fields, "crop_type", &snapshot.property("cropType"));

    // Locations can be GeoJSON objects; the ERP field is plain text.
    if let Some(location) = snapshot.property("location").value() {
        let rendered = match location {
            Value::String(text) => text.clone(),
            other => other.to_string()
        };
        fields.insert("location".to_string(), Value::String(rendered));
    }
}

fn transform_device(snapshot: &EntitySnapshot, fields: &mut Map<String, Value>) {
    insert_property(fields, "serial_no", &snapshot.property("serialNumber"));
    insert_property(fields, "note", &snapshot.property("description"));
    insert_property(fields, "device_type", &snapshot.property("deviceType"));
    insert_property(fields, "status", &snapshot.property("status"));
}

fn transform_meter(snapshot: &EntitySnapshot, fields: &mut Map<String, Value>) {
    insert_property(fields, "code", &snapshot.property("meterCode"));
    insert_property(fields, "supply_point", &snapshot.property("supplyPoint"));

    let meter_type = snapshot
        .property("meterType")
        .as_str()
        .map_or_else(|| "production".to_string(), String::from);
    fields.insert("meter_type".to_string(), Value::String(meter_type));
}

fn transform_installation(snapshot: &EntitySnapshot, fields: &mut Map<String, Value>) {
    fields.insert(
        "installation_type".to_string(),
        Value::String("solar".to_string())
    );
    insert_property(fields, "power_peak", &snapshot.property("peakPower"));
    insert_property(fields, "orientation", &snapshot.property("orientation"));
    insert_property(fields, "tilt", &snapshot.property("tilt"));
}

fn transform_partner(snapshot: &EntitySnapshot, fields: &mut Map<String, Value>) {
    fields.insert("is_company".to_string(), Value::Bool(true));

    // Known address sub-fields only; anything else in the object is dropped.
    if let Some(address) = snapshot.property("address").as_object() {
        for (sub_field, target) in [
            ("streetAddress", "street"),
            ("addressLocality", "city"),
            ("postalCode", "zip")
        ] {
            if let Some(value) = address.get(sub_field) {
                if !value.is_null() {
                    fields.insert(target.to_string(), value.clone());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(value: Value) -> EntitySnapshot {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_classify_routing_table() {
        assert_eq!(classify("AgriParcel"), Some(RecordKind::Product));
        assert_eq!(classify("Device"), Some(RecordKind::Equipment));
        assert_eq!(classify("WeatherStation"), Some(RecordKind::Equipment));
        assert_eq!(classify("EnergyMeter"), Some(RecordKind::Meter));
        assert_eq!(classify("SolarPanel"), Some(RecordKind::Installation));
        assert_eq!(classify("Building"), Some(RecordKind::Partner));
        assert_eq!(classify("RoadSegment"), None);
    }

    #[test]
    fn test_every_synced_type_has_a_route() {
        for entity_type in SYNCED_TYPES {
            assert!(classify(entity_type).is_some(), "no route for {entity_type}");
        }
    }

    #[test]
    fn test_property_decoding_variants() {
        let entity = snapshot(json!({
            "id": "urn:x:1",
            "type": "AgriParcel",
            "bare": 3.5,
            "wrapped": {"value": 4.0},
            "ld_wrapped": {"@value": "oats"}
        }));

        assert_eq!(entity.property("bare"), PropertyValue::Bare(json!(3.5)));
        assert_eq!(entity.property("wrapped"), PropertyValue::Wrapped(json!(4.0)));
        assert_eq!(
            entity.property("ld_wrapped"),
            PropertyValue::Wrapped(json!("oats"))
        );
        assert_eq!(entity.property("missing"), PropertyValue::Absent);
    }

    #[test]
    fn test_transform_parcel_with_wrapped_properties() {
        let entity = snapshot(json!({
            "id": "urn:x:parcel:1",
            "type": "AgriParcel",
            "name": {"value": "North field"},
            "area": {"value": 3.5},
            "cropType": "barley"
        }));

        let fields = transform(&entity, RecordKind::Product);
        assert_eq!(fields["name"], json!("North field"));
        assert_eq!(fields["external_id"], json!("urn:x:parcel:1"));
        assert_eq!(fields["area"], json!(3.5));
        assert_eq!(fields["crop_type"], json!("barley"));
        assert!(!fields.contains_key("description"));
    }

    #[test]
    fn test_transform_defaults_name_to_entity_id() {
        let entity = snapshot(json!({
            "id": "urn:x:device:9",
            "type": "Device"
        }));

        let fields = transform(&entity, RecordKind::Equipment);
        assert_eq!(fields["name"], json!("urn:x:device:9"));
        assert!(!fields.contains_key("serial_no"));
    }

    #[test]
    fn test_transform_meter_default_type() {
        let entity = snapshot(json!({
            "id": "urn:x:meter:1",
            "type": "EnergyMeter",
            "meterCode": {"value": "M-001"}
        }));

        let fields = transform(&entity, RecordKind::Meter);
        assert_eq!(fields["code"], json!("M-001"));
        assert_eq!(fields["meter_type"], json!("production"));
    }

    #[test]
    fn test_transform_partner_decomposes_address() {
        let entity = snapshot(json!({
            "id": "urn:x:building:1",
            "type": "Building",
            "address": {"value": {
                "streetAddress": "1 Mill Road",
                "addressLocality": "Ordizia",
                "postalCode": "20240",
                "floorCount": 3
            }}
        }));

        let fields = transform(&entity, RecordKind::Partner);
        assert_eq!(fields["is_company"], json!(true));
        assert_eq!(fields["street"], json!("1 Mill Road"));
        assert_eq!(fields["city"], json!("Ordizia"));
        assert_eq!(fields["zip"], json!("20240"));
        // Unknown sub-fields are dropped, not forwarded.
        assert!(!fields.contains_key("floorCount"));
    }

    #[test]
    fn test_transform_location_is_stringified() {
        let entity = snapshot(json!({
            "id": "urn:x:parcel:2",
            "type": "AgriParcel",
            "location": {"value": {"type": "Point", "coordinates": [2.1, 41.4]}}
        }));

        let fields = transform(&entity, RecordKind::Product);
        let location = fields["location"].as_str().unwrap();
        assert!(location.contains("coordinates"));
    }
}
