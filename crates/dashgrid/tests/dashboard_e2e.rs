#![forbid(unsafe_code)]

//! Dashboard load, repeat, and save round trip.
//!
//! Run:
//!   cargo test -p dashgrid --test dashboard_e2e

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use dashgrid::prelude::*;
use dashgrid::{DashboardModel, OneOrMany, RepeatKind};

const DASHBOARD: &str = r#"{
  "uid": "hosts",
  "title": "Hosts",
  "templating": {
    "list": [
      {"name": "server", "type": "custom", "query": "web1,web2,web3", "multi": true,
       "includeAll": true, "current": {"text": ["web1", "web2", "web3"], "value": ["web1", "web2", "web3"]}},
      {"name": "dc", "type": "query", "multi": true,
       "options": [{"text": "East", "value": "east"}, {"text": "West", "value": "west"}],
       "current": {"text": ["East", "West"], "value": ["east", "west"]}},
      {"name": "env", "type": "constant", "query": "prod"}
    ]
  },
  "panels": [
    {"id": 1, "type": "timeseries", "title": "CPU $server", "gridPos": {"x": 0, "y": 0, "w": 24, "h": 8},
     "repeat": "server", "repeatDirection": "h", "maxPerRow": 2},
    {"id": 2, "type": "row", "title": "DC $dc", "gridPos": {"x": 0, "y": 8, "w": 24, "h": 1},
     "repeat": "dc", "collapsed": false, "panels": []},
    {"id": 3, "type": "stat", "title": "Load ${dc:text} $env", "gridPos": {"x": 0, "y": 9, "w": 24, "h": 4}},
    {"id": 4, "type": "row", "title": "Footer", "gridPos": {"x": 0, "y": 13, "w": 24, "h": 1},
     "collapsed": true, "panels": []}
  ]
}"#;

fn load() -> Rc<Dashboard> {
    Dashboard::from_json(DASHBOARD, &DashboardConfig::default()).expect("dashboard loads")
}

fn multi(dashboard: &Dashboard, name: &str) -> MultiValueVariable {
    dashboard
        .variable(name)
        .and_then(|v| v.as_multi().cloned())
        .expect("multi-value variable")
}

#[test]
fn activation_materialises_panel_and_row_repeats() {
    let dashboard = load();
    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&events);
    let _sub = dashboard.subscribe_repeats_processed(move |event| {
        let SceneEvent::RepeatsProcessed { kind, key, .. } = event;
        sink.borrow_mut().push((*kind, key.clone()));
    });

    dashboard.activate();

    let item = dashboard.body().find_item("grid-item-1").expect("repeated item");
    assert_eq!(item.repeated_panels().len(), 3);
    assert_eq!(item.pos().h, 16);

    let clone = dashboard.find_panel("panel-1-clone-2").expect("third clone");
    assert_eq!(clone.interpolated_title(), "CPU web3");

    let rows: Vec<String> = dashboard.body().rows().iter().map(|r| r.key()).collect();
    assert_eq!(rows, vec!["panel-2", "panel-2-clone-west", "panel-4"]);
    let west = dashboard.body().find_row("panel-2-clone-west").expect("row clone");
    assert_eq!(west.items()[0].body().interpolated_title(), "Load West prod");

    let footer = dashboard.body().find_row("panel-4").expect("footer");
    assert_eq!(footer.pos().y, 26);

    let kinds: Vec<RepeatKind> = events.borrow().iter().map(|(k, _)| *k).collect();
    assert!(kinds.contains(&RepeatKind::Panel));
    assert!(kinds.contains(&RepeatKind::Row));
}

#[test]
fn variable_changes_flow_through_to_clones() {
    let dashboard = load();
    dashboard.activate();

    multi(&dashboard, "server").select(&["web2"]);
    let item = dashboard.body().find_item("grid-item-1").expect("repeated item");
    assert_eq!(item.repeated_panels().len(), 1);
    assert_eq!(item.pos().h, 8);
    assert!(dashboard.find_panel("panel-1-clone-1").is_none());

    multi(&dashboard, "dc").select(&["west"]);
    let rows: Vec<String> = dashboard.body().rows().iter().map(|r| r.key()).collect();
    assert_eq!(rows, vec!["panel-2", "panel-4"]);
}

#[test]
fn deactivated_dashboard_ignores_variable_changes() {
    let dashboard = load();
    dashboard.activate();
    dashboard.deactivate();

    multi(&dashboard, "server").select(&["web1"]);
    let item = dashboard.body().find_item("grid-item-1").expect("repeated item");
    assert_eq!(item.repeated_panels().len(), 3);
}

#[test]
fn saving_skips_clones_and_keeps_selection() {
    let dashboard = load();
    dashboard.activate();
    multi(&dashboard, "server").select(&["web1", "web3"]);

    let saved: DashboardModel =
        serde_json::from_str(&dashboard.to_json().expect("saves")).expect("saved json parses");
    let ids: Vec<u32> = saved.panels.iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4]);
    assert_eq!(saved.panels[0].grid_pos.h, 8);
    assert_eq!(saved.panels[0].repeat.as_deref(), Some("server"));

    let server = &saved.templating.list[0];
    assert_eq!(
        server.current.value,
        OneOrMany::Many(vec!["web1".into(), "web3".into()])
    );
    let env = &saved.templating.list[2];
    assert_eq!(env.current.value, OneOrMany::One("prod".into()));
}

#[test]
fn saved_dashboard_loads_again() {
    let dashboard = load();
    dashboard.activate();
    let json = dashboard.to_json().expect("saves");

    let reloaded = Dashboard::from_json(&json, &DashboardConfig::default()).expect("reloads");
    reloaded.activate();
    let item = reloaded.body().find_item("grid-item-1").expect("repeated item");
    assert_eq!(item.repeated_panels().len(), 3);
    assert_eq!(reloaded.body().rows().len(), 3);
}

#[test]
fn config_file_drives_repeat_defaults() {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp file");
    writeln!(file, "[repeat]\nmax_per_row = 3\n").expect("write config");

    let config = DashboardConfig::from_file(file.path()).expect("config loads");
    let json = r#"{"uid": "d", "templating": {"list": [
        {"name": "x", "type": "custom", "query": "1,2,3,4", "multi": true,
         "current": {"text": ["1","2","3","4"], "value": ["1","2","3","4"]}}
    ]}, "panels": [
        {"id": 1, "type": "stat", "gridPos": {"x": 0, "y": 0, "w": 24, "h": 5}, "repeat": "x"}
    ]}"#;
    let dashboard = Dashboard::from_json(json, &config).expect("loads");
    dashboard.activate();
    let item = dashboard.body().find_item("grid-item-1").expect("item");
    assert_eq!(item.repeat().and_then(|r| r.max_per_row), Some(3));
    assert_eq!(item.pos().h, 10);
}

#[test]
fn missing_config_file_is_an_io_error() {
    let dir = tempfile::tempdir().expect("temp dir");
    let err = DashboardConfig::from_file(dir.path().join("absent.toml")).expect_err("missing");
    assert!(matches!(err, DashboardError::Io(_)));
}

#[test]
fn malformed_json_is_reported() {
    let err = Dashboard::from_json("{\"panels\": [", &DashboardConfig::default())
        .expect_err("malformed");
    assert!(matches!(err, DashboardError::Json(_)));
}
