use sentinel_ingest::models::{DataSource, MetadataValue, RawEvent};

/// Companion to the unit-level round trip in `models.rs`: this exercises
/// the wire format the way a downstream consumer actually sees it, as a
/// standalone JSON document rather than through `serde_json::to_string`.
#[test]
fn raw_event_round_trips_through_untyped_json_value() {
    let mut event = RawEvent::new(DataSource::CentralBank, "tcmb:2026-07-27", "Policy rate held at 50%");
    event.symbols = vec!["USDTRY".to_string()];
    event.title = Some("TCMB holds rates".to_string());
    event
        .metadata
        .insert("policy_rate_percent".to_string(), MetadataValue::from(50.0));

    let value: serde_json::Value = serde_json::to_value(&event).unwrap();

    assert_eq!(value["source"], "central-bank");
    assert_eq!(value["symbols"][0], "USDTRY");
    assert_eq!(value["metadata"]["policy_rate_percent"], 50.0);
    assert!(value["tenant_id"].is_null());

    let parsed: RawEvent = serde_json::from_value(value).unwrap();
    assert_eq!(parsed.event_id, event.event_id);
    assert_eq!(parsed.title, event.title);
}

#[test]
fn unknown_data_source_variant_is_rejected_on_deserialize() {
    let json = serde_json::json!({
        "event_id": "00000000-0000-0000-0000-000000000000",
        "source": "not-a-real-source",
        "source_id": "x",
        "content": "x",
        "metadata": {},
        "collected_at": "2026-07-27T00:00:00Z",
        "published_at": null,
        "symbols": [],
        "title": null,
        "url": null,
        "author": null,
        "tenant_id": null
    });

    let result: Result<RawEvent, _> = serde_json::from_value(json);
    assert!(result.is_err());
}
