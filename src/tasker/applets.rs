// SPDX-License-Identifier: MIT

//! Built-in applet catalog
//!
//! A small set of criteria and actions working on event data, the resolved
//! target text and global values. Enough to write and try tasks from the
//! command line.

use crate::engine::applet::{
    ActionOutput, AppletCall, AppletId, AppletNode, AppletRegistry, Match, Value,
};
use crate::engine::runtime::{Event, ScopedKey, Target, TargetSupplier};
use std::error::Error;
use std::sync::Arc;

pub const PACKAGE_IS: AppletId = AppletId(0x1000);
pub const PANE_TITLE_IS: AppletId = AppletId(0x1001);
pub const TARGET_TEXT_IS: AppletId = AppletId(0x1002);
pub const EXTRA_EQUALS: AppletId = AppletId(0x1003);
pub const GLOBAL_EQUALS: AppletId = AppletId(0x1004);

pub const LOG: AppletId = AppletId(0x1100);
pub const SET_GLOBAL: AppletId = AppletId(0x1101);
pub const INCREMENT: AppletId = AppletId(0x1102);
pub const ECHO: AppletId = AppletId(0x1103);
pub const CLICK: AppletId = AppletId(0x1104);

/// Event extra holding the text of the node the event is about
pub const EXTRA_TEXT: u32 = 1;

type BoxError = Box<dyn Error + Send + Sync>;

/// Target resolved from event data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextTarget {
    pub text: String,
}

/// Supplies a `TextTarget` from the newest event carrying `EXTRA_TEXT`
pub struct EventTextSupplier;

impl TargetSupplier for EventTextSupplier {
    fn resolve(&self, _node: &AppletNode, events: &[Event]) -> Option<Target> {
        events
            .iter()
            .rev()
            .find_map(|e| e.extra(EXTRA_TEXT).and_then(Value::as_str))
            .map(|text| {
                Arc::new(TextTarget {
                    text: text.to_string(),
                }) as Target
            })
    }
}

/// Register every built-in applet
pub fn register_builtin(registry: &AppletRegistry) {
    registry.register_criterion_fn(PACKAGE_IS, "package-is", package_is);
    registry.register_criterion_fn(PANE_TITLE_IS, "pane-title-is", pane_title_is);
    registry.register_criterion_fn(TARGET_TEXT_IS, "target-text-is", target_text_is);
    registry.register_criterion_fn(EXTRA_EQUALS, "extra-equals", extra_equals);
    registry.register_criterion_fn(GLOBAL_EQUALS, "global-equals", global_equals);

    registry.register_action_fn(LOG, "log", log_message);
    registry.register_action_fn(SET_GLOBAL, "set-global", set_global);
    registry.register_action_fn(INCREMENT, "increment", increment);
    registry.register_action_fn(ECHO, "echo", echo);
    registry.register_action_fn(CLICK, "click", click);
}

fn text_match(actual: Option<&str>, expected: Option<&Value>) -> Match {
    let actual_value = actual.map(Value::from);
    let matched = match (actual, expected.and_then(Value::as_str)) {
        (Some(a), Some(e)) => a == e,
        _ => false,
    };
    Match::of(matched, actual_value)
}

fn package_is(call: &AppletCall<'_>) -> Result<Match, BoxError> {
    let package = call.events.iter().rev().find_map(Event::package_name);
    Ok(text_match(package, call.expected()))
}

fn pane_title_is(call: &AppletCall<'_>) -> Result<Match, BoxError> {
    let pane = call
        .events
        .iter()
        .rev()
        .find_map(|e| e.component().pane_title.as_deref());
    Ok(text_match(pane, call.expected()))
}

fn target_text_is(call: &AppletCall<'_>) -> Result<Match, BoxError> {
    let text = call.target_as::<TextTarget>().map(|t| t.text.as_str());
    Ok(text_match(text, call.expected()))
}

/// Literal `[key, expected]`; a referenced slot 0 overrides `expected`
fn extra_equals(call: &AppletCall<'_>) -> Result<Match, BoxError> {
    let (key, literal) = pair(call.value(), "extra-equals")?;
    let key = key
        .as_i64()
        .and_then(|k| u32::try_from(k).ok())
        .ok_or("extra-equals key must be a non-negative integer")?;
    let expected = call.arg(0).unwrap_or(literal);
    let actual = call.events.iter().rev().find_map(|e| e.extra(key)).cloned();
    Ok(Match::of(actual.as_ref() == Some(expected), actual))
}

/// Literal `[name, expected]`
fn global_equals(call: &AppletCall<'_>) -> Result<Match, BoxError> {
    let (name, literal) = pair(call.value(), "global-equals")?;
    let name = name.as_str().ok_or("global-equals name must be text")?;
    let expected = call.arg(0).unwrap_or(literal);
    let actual = call.globals.get(&ScopedKey::global(name));
    Ok(Match::of(actual.as_ref() == Some(expected), actual))
}

fn pair<'a>(value: Option<&'a Value>, applet: &str) -> Result<(&'a Value, &'a Value), BoxError> {
    match value.and_then(Value::as_list) {
        Some([first, second]) => Ok((first, second)),
        _ => Err(format!("{} expects a two-element list", applet).into()),
    }
}

fn log_message(call: &AppletCall<'_>) -> Result<ActionOutput, BoxError> {
    let message = call
        .expected()
        .map(|v| v.to_string())
        .unwrap_or_default();
    log::info!("[{:016x}] {}", call.task_checksum, message);
    Ok(ActionOutput::done())
}

/// Literal `[name, value]`; a referenced slot 0 overrides `value`
fn set_global(call: &AppletCall<'_>) -> Result<ActionOutput, BoxError> {
    let (name, literal) = pair(call.value(), "set-global")?;
    let name = name.as_str().ok_or("set-global name must be text")?;
    let value = call.arg(0).unwrap_or(literal).clone();
    call.globals.set(ScopedKey::global(name), value.clone());
    Ok(ActionOutput::returning(value))
}

/// Literal: the name of a global integer, created at 0
fn increment(call: &AppletCall<'_>) -> Result<ActionOutput, BoxError> {
    let name = call
        .value()
        .and_then(Value::as_str)
        .ok_or("increment expects a global name")?;
    let key = ScopedKey::global(name);
    let current = call
        .globals
        .get_or_insert_with(key.clone(), || Value::Int(0))
        .as_i64()
        .ok_or_else(|| format!("global '{}' is not an integer", name))?;
    let next = Value::Int(current + 1);
    call.globals.set(key, next.clone());
    Ok(ActionOutput::returning(next))
}

fn echo(call: &AppletCall<'_>) -> Result<ActionOutput, BoxError> {
    Ok(match call.expected() {
        Some(value) => ActionOutput::returning(value.clone()),
        None => ActionOutput::done(),
    })
}

fn click(call: &AppletCall<'_>) -> Result<ActionOutput, BoxError> {
    match call.target_as::<TextTarget>() {
        Some(target) => {
            log::info!("Click on '{}'", target.text);
            Ok(ActionOutput::returning(target.text.clone()))
        }
        None => Ok(ActionOutput::failed(None)),
    }
}
