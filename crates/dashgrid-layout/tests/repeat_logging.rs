#![forbid(unsafe_code)]

//! Log records emitted by the repeat engines.
//!
//! - Completed cycles open an INFO `repeat.cycle` span carrying the clone
//!   count; row cycles record the height of the whole repeated block.
//! - A missing row variable is a WARN; a variable of the wrong kind is an
//!   ERROR, both naming the node.
//! - Unchanged cycles stay at DEBUG.
//!
//! Run:
//!   cargo test -p dashgrid-layout --test repeat_logging

use std::collections::HashMap;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use dashgrid_core::GridPos;
use dashgrid_layout::{GridLayout, GridRow, PanelItem, RepeatOptions, VizPanel};
use dashgrid_scene::{MultiValueVariable, SceneNodeExt, TextVariable, Variable, VariableSet};
use tracing::Level;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::{Context, SubscriberExt};

// ============================================================================
// Capture layer
// ============================================================================

#[derive(Debug, Clone)]
struct CapturedEvent {
    level: Level,
    message: String,
    fields: HashMap<String, String>,
}

#[derive(Debug, Clone)]
struct CapturedSpan {
    id: tracing::span::Id,
    name: String,
    level: Level,
    fields: HashMap<String, String>,
}

#[derive(Default, Clone)]
struct Captured {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
    spans: Arc<Mutex<Vec<CapturedSpan>>>,
}

impl Captured {
    fn events_at(&self, level: Level) -> Vec<CapturedEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.level == level)
            .cloned()
            .collect()
    }

    fn spans_named(&self, name: &str) -> Vec<CapturedSpan> {
        self.spans
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.name == name)
            .cloned()
            .collect()
    }
}

struct FieldVisitor(HashMap<String, String>);

impl tracing::field::Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.0.insert(field.name().to_string(), format!("{value:?}"));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.0.insert(field.name().to_string(), value.to_string());
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.0.insert(field.name().to_string(), value.to_string());
    }
}

impl<S: tracing::Subscriber> Layer<S> for Captured {
    fn on_new_span(
        &self,
        attrs: &tracing::span::Attributes<'_>,
        id: &tracing::span::Id,
        _ctx: Context<'_, S>,
    ) {
        let mut visitor = FieldVisitor(HashMap::new());
        attrs.record(&mut visitor);
        self.spans.lock().unwrap().push(CapturedSpan {
            id: id.clone(),
            name: attrs.metadata().name().to_string(),
            level: *attrs.metadata().level(),
            fields: visitor.0,
        });
    }

    fn on_record(
        &self,
        id: &tracing::span::Id,
        values: &tracing::span::Record<'_>,
        _ctx: Context<'_, S>,
    ) {
        let mut visitor = FieldVisitor(HashMap::new());
        values.record(&mut visitor);
        let mut spans = self.spans.lock().unwrap();
        if let Some(span) = spans.iter_mut().rev().find(|s| &s.id == id) {
            span.fields.extend(visitor.0);
        }
    }

    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor(HashMap::new());
        event.record(&mut visitor);
        let message = visitor.0.remove("message").unwrap_or_default();
        self.events.lock().unwrap().push(CapturedEvent {
            level: *event.metadata().level(),
            message,
            fields: visitor.0,
        });
    }
}

fn capture(run: impl FnOnce()) -> Captured {
    let captured = Captured::default();
    let subscriber = tracing_subscriber::registry().with(captured.clone());
    tracing::subscriber::with_default(subscriber, run);
    captured
}

fn repeated_panel(vars: Vec<Variable>) -> (Rc<GridLayout>, Rc<PanelItem>) {
    let item = PanelItem::build(
        "grid-item-1",
        GridPos::new(0, 0, 24, 5),
        VizPanel::build("panel-1", "Host $host", "stat"),
    );
    item.set_repeat(RepeatOptions::new("host"));
    let grid = GridLayout::with_variables(
        "grid",
        VariableSet::new(vars),
        vec![Rc::clone(&item).into()],
    );
    grid.activate();
    (grid, item)
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn completed_cycle_opens_info_span() {
    let host = MultiValueVariable::custom("host", &["a", "b", "c"]);
    let captured = capture(|| {
        let _keep = repeated_panel(vec![host.into()]);
    });

    let spans = captured.spans_named("repeat.cycle");
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].level, Level::INFO);
    assert_eq!(spans[0].fields.get("kind").map(String::as_str), Some("panel"));
    assert_eq!(spans[0].fields.get("clones").map(String::as_str), Some("3"));
    assert!(captured.events_at(Level::ERROR).is_empty());
}

#[test]
fn row_cycle_records_block_height() {
    let dc = MultiValueVariable::custom("dc", &["east", "west", "north"]);
    let captured = capture(|| {
        let item = PanelItem::build(
            "grid-item-2",
            GridPos::new(0, 1, 24, 3),
            VizPanel::build("panel-2", "Load $dc", "stat"),
        );
        let row = GridRow::build("panel-1", "DC $dc", 0, vec![item]);
        row.set_repeat("dc");
        let grid = GridLayout::with_variables(
            "grid",
            VariableSet::new(vec![dc.into()]),
            vec![row.into()],
        );
        grid.activate();
        assert_eq!(grid.rows().len(), 3);
    });

    let spans = captured.spans_named("repeat.cycle");
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].fields.get("kind").map(String::as_str), Some("row"));
    assert_eq!(spans[0].fields.get("block_height").map(String::as_str), Some("12"));
    assert!(!spans[0].fields.contains_key("height"));
}

#[test]
fn wrong_variable_kind_is_an_error() {
    let captured = capture(|| {
        let (_grid, item) = repeated_panel(vec![TextVariable::new("host", "x").into()]);
        assert!(item.repeated_panels().is_empty());
    });

    let errors = captured.events_at(Level::ERROR);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].message, "panel repeat aborted");
    assert_eq!(errors[0].fields.get("key").map(String::as_str), Some("grid-item-1"));
    assert!(errors[0].fields["err"].contains("not a multi-value variable"));
}

#[test]
fn missing_row_variable_is_a_warning() {
    let captured = capture(|| {
        let row = GridRow::build("panel-1", "Row", 0, Vec::new());
        row.set_repeat("dc");
        let grid = GridLayout::new("grid", vec![row.into()]);
        grid.activate();
        assert_eq!(grid.rows().len(), 1);
    });

    let warnings = captured.events_at(Level::WARN);
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].message, "row repeat aborted");
    assert_eq!(warnings[0].fields.get("row").map(String::as_str), Some("panel-1"));
    assert!(captured.events_at(Level::ERROR).is_empty());
}

#[test]
fn unchanged_values_log_at_debug_only() {
    let host = MultiValueVariable::custom("host", &["a"]);
    let (_grid, item) = repeated_panel(vec![host.into()]);
    let captured = capture(|| item.perform_repeat());

    assert!(captured.spans_named("repeat.cycle").is_empty());
    let debug = captured.events_at(Level::DEBUG);
    assert!(debug.iter().any(|e| e.message == "panel repeat skipped, values unchanged"));
}

#[test]
fn duplicate_grid_key_is_a_warning() {
    let captured = capture(|| {
        let grid = GridLayout::new("grid", Vec::new());
        let first = PanelItem::build(
            "grid-item-1",
            GridPos::new(0, 0, 4, 4),
            VizPanel::build("panel-1", "A", "stat"),
        );
        let second = PanelItem::build(
            "grid-item-1",
            GridPos::new(4, 0, 4, 4),
            VizPanel::build("panel-2", "B", "stat"),
        );
        assert!(grid.append(first));
        assert!(!grid.append(second));
    });

    let warnings = captured.events_at(Level::WARN);
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].message, "duplicate grid child key");
}
