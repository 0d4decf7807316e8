//! Command execution engine.
//!
//! Stateless per invocation: one command in, fan-out resolution, the
//! low-level operation sequence reactive front-ends expect, a success
//! or failure out. Third-party pages observe clicks as a full
//! pointer/mouse sequence at real coordinates and typed text through
//! the platform's native value setter, not a bare synthetic `click()`
//! or a silent property write.

mod http;

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::capture::AuthContext;
use crate::command::{Command, CommandKind};
use crate::dom::{DomEvent, NodeId};
use crate::locator::resolve::{resolve_any, Resolved};
use crate::page::Page;
use crate::{Error, Result};

/// Tunables for timing-sensitive behavior. Defaults mirror what live
/// pages tolerate; tests shrink them under paused time.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Delay between characters on the reactive typing path.
    pub char_delay_ms: u64,
    /// Settle delay after reactive typing, letting suggestion lists
    /// populate.
    pub settle_ms: u64,
    /// Poll interval while waiting for a dynamic-list widget's target
    /// to exist.
    pub dynamic_poll_interval_ms: u64,
    /// Ceiling for that poll.
    pub dynamic_poll_timeout_ms: u64,
    /// Poll interval for `wait-visible`.
    pub visible_poll_interval_ms: u64,
    /// Timeout for `wait-visible`.
    pub visible_timeout_ms: u64,
    /// Marker substrings identifying dynamic list widgets and
    /// character-reactive fields, matched case-insensitively against
    /// locators and the element's `id`/`name`.
    pub dynamic_markers: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            char_delay_ms: 100,
            settle_ms: 500,
            dynamic_poll_interval_ms: 200,
            dynamic_poll_timeout_ms: 8_000,
            visible_poll_interval_ms: 200,
            visible_timeout_ms: 10_000,
            dynamic_markers: vec![
                "select2".into(),
                "autocomplete".into(),
                "typeahead".into(),
                "combobox".into(),
                "suggest".into(),
                "listbox".into(),
            ],
        }
    }
}

/// Successful step result: which locator actually matched (when the
/// command targeted an element) and the parsed response body (for
/// `api-request`).
#[derive(Debug, Clone, Default)]
pub struct StepOutcome {
    pub locator: Option<String>,
    pub response: Option<serde_json::Value>,
}

pub struct Engine {
    config: EngineConfig,
    api: http::ApiClient,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            config,
            api: http::ApiClient::new(),
        }
    }

    /// Execute one command against the page.
    ///
    /// `auth` is a copy of the bridge's cached authorization context;
    /// `cancel` aborts any in-flight wait when the session stops.
    pub async fn execute(
        &self,
        page: &mut Page,
        cmd: &Command,
        auth: Option<&AuthContext>,
        cancel: &CancellationToken,
    ) -> Result<StepOutcome> {
        match cmd.kind {
            CommandKind::Open => {
                page.navigate(&cmd.target).await?;
                Ok(StepOutcome::default())
            }
            CommandKind::Click => self.click(page, cmd, cancel).await,
            CommandKind::Type => self.type_text(page, cmd, cancel).await,
            CommandKind::Select => self.select(page, cmd),
            CommandKind::Check => self.set_checked(page, cmd, true),
            CommandKind::Uncheck => self.set_checked(page, cmd, false),
            CommandKind::WaitVisible => self.wait_visible(page, cmd, cancel).await,
            CommandKind::Pause => {
                let ms = cmd
                    .value
                    .trim()
                    .parse::<u64>()
                    .or_else(|_| cmd.target.trim().parse::<u64>())
                    .unwrap_or(1_000);
                debug!(ms, "pause");
                self.sleep(cancel, ms).await?;
                Ok(StepOutcome::default())
            }
            CommandKind::Refresh => {
                page.reload().await?;
                Ok(StepOutcome::default())
            }
            CommandKind::ApiRequest => {
                let response = self.api.execute(cmd, auth).await?;
                Ok(StepOutcome {
                    locator: None,
                    response,
                })
            }
        }
    }

    // --- clicking --------------------------------------------------------

    async fn click(
        &self,
        page: &mut Page,
        cmd: &Command,
        cancel: &CancellationToken,
    ) -> Result<StepOutcome> {
        // Dynamic list widgets populate their options asynchronously;
        // the target may not exist yet when the step begins.
        let resolved = if self.locator_matches_marker(cmd) {
            self.poll_resolve(page, cmd, cancel).await?
        } else {
            resolve_any(&page.doc(), &cmd.target, &cmd.targets, false)?
        };
        info!(locator = resolved.locator.as_str(), "click");

        let node = resolved.node;
        let (x, y) = {
            let mut doc = page.doc();
            doc.highlight(node);
            doc.bbox(node).center()
        };
        {
            let mut doc = page.doc();
            for name in ["pointerdown", "mousedown", "pointerup", "mouseup", "click"] {
                doc.dispatch(node, DomEvent::mouse(name, x, y));
            }
            if doc.is_editable(node) {
                doc.focus(node);
            }
        }
        Ok(StepOutcome {
            locator: Some(resolved.locator),
            response: None,
        })
    }

    async fn poll_resolve(
        &self,
        page: &Page,
        cmd: &Command,
        cancel: &CancellationToken,
    ) -> Result<Resolved> {
        let deadline = tokio::time::Instant::now()
            + Duration::from_millis(self.config.dynamic_poll_timeout_ms);
        loop {
            let attempt = resolve_any(&page.doc(), &cmd.target, &cmd.targets, false);
            match attempt {
                Ok(resolved) => return Ok(resolved),
                Err(_) if tokio::time::Instant::now() < deadline => {
                    self.sleep(cancel, self.config.dynamic_poll_interval_ms)
                        .await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    // --- typing ----------------------------------------------------------

    async fn type_text(
        &self,
        page: &mut Page,
        cmd: &Command,
        cancel: &CancellationToken,
    ) -> Result<StepOutcome> {
        let resolved = resolve_any(&page.doc(), &cmd.target, &cmd.targets, false)?;
        let node = resolved.node;
        let reactive = self.is_reactive_target(page, cmd, node);
        info!(locator = resolved.locator.as_str(), reactive, "type");

        {
            let mut doc = page.doc();
            doc.highlight(node);
            doc.focus(node);
            doc.set_value_native(node, "");
        }

        if reactive {
            // Character-level path: some fields only react to real key
            // traffic. The value still goes through the native setter
            // before each `input` so guarded-setter frameworks see it.
            let mut acc = String::new();
            for ch in cmd.value.chars() {
                acc.push(ch);
                let key = ch.to_string();
                {
                    let mut doc = page.doc();
                    doc.dispatch(node, DomEvent::keyboard("keydown", &key));
                    doc.dispatch(node, DomEvent::keyboard("keypress", &key));
                    doc.set_value_native(node, &acc);
                    doc.dispatch(node, DomEvent::keyboard("keyup", &key));
                    doc.dispatch(node, DomEvent::simple("input"));
                }
                self.sleep(cancel, self.config.char_delay_ms).await?;
            }
            {
                let mut doc = page.doc();
                doc.dispatch(node, DomEvent::simple("change"));
                if !self.locator_matches_marker(cmd) {
                    doc.blur(node);
                }
            }
            self.sleep(cancel, self.config.settle_ms).await?;
        } else {
            let mut doc = page.doc();
            doc.set_value_native(node, &cmd.value);
            doc.dispatch(node, DomEvent::simple("input"));
            doc.dispatch(node, DomEvent::simple("change"));
        }

        Ok(StepOutcome {
            locator: Some(resolved.locator),
            response: None,
        })
    }

    // --- forms -----------------------------------------------------------

    fn select(&self, page: &mut Page, cmd: &Command) -> Result<StepOutcome> {
        let resolved = resolve_any(&page.doc(), &cmd.target, &cmd.targets, false)?;
        let node = resolved.node;
        info!(locator = resolved.locator.as_str(), value = cmd.value.as_str(), "select");

        let mut doc = page.doc();
        if doc.tag(node) != Some("select") {
            return Err(Error::Execution(format!(
                "'{}' is not a select element",
                resolved.locator
            )));
        }
        doc.highlight(node);

        let options: Vec<NodeId> = doc
            .descendants(node)
            .into_iter()
            .filter(|&n| doc.tag(n) == Some("option"))
            .collect();

        let raw = cmd.value.as_str();
        let (mode, needle) = match raw.split_once('=') {
            Some((m @ ("label" | "value" | "index"), rest)) => (m, rest),
            _ => ("", raw),
        };
        let option = match mode {
            "label" => options
                .iter()
                .copied()
                .find(|&o| crate::locator::glob_match(needle, doc.computed_text(o).trim())),
            "value" => options
                .iter()
                .copied()
                .find(|&o| option_value(&doc, o) == needle),
            "index" => needle
                .trim()
                .parse::<usize>()
                .ok()
                .and_then(|i| options.get(i).copied()),
            _ => options.iter().copied().find(|&o| {
                doc.computed_text(o).trim() == needle || option_value(&doc, o) == needle
            }),
        };
        let option = option.ok_or_else(|| Error::OptionNotFound(cmd.value.clone()))?;

        let value = option_value(&doc, option);
        doc.set_value_native(node, &value);
        doc.dispatch(node, DomEvent::simple("change"));
        drop(doc);

        Ok(StepOutcome {
            locator: Some(resolved.locator),
            response: None,
        })
    }

    fn set_checked(&self, page: &mut Page, cmd: &Command, checked: bool) -> Result<StepOutcome> {
        let resolved = resolve_any(&page.doc(), &cmd.target, &cmd.targets, false)?;
        let node = resolved.node;
        info!(locator = resolved.locator.as_str(), checked, "set checked");

        let mut doc = page.doc();
        doc.highlight(node);
        doc.set_checked(node, checked);
        doc.dispatch(node, DomEvent::simple("change"));
        drop(doc);

        Ok(StepOutcome {
            locator: Some(resolved.locator),
            response: None,
        })
    }

    // --- waiting ---------------------------------------------------------

    async fn wait_visible(
        &self,
        page: &Page,
        cmd: &Command,
        cancel: &CancellationToken,
    ) -> Result<StepOutcome> {
        let deadline =
            tokio::time::Instant::now() + Duration::from_millis(self.config.visible_timeout_ms);
        loop {
            let attempt = resolve_any(&page.doc(), &cmd.target, &cmd.targets, true);
            match attempt {
                Ok(resolved) => {
                    page.doc().highlight(resolved.node);
                    return Ok(StepOutcome {
                        locator: Some(resolved.locator),
                        response: None,
                    });
                }
                Err(_) if tokio::time::Instant::now() < deadline => {
                    self.sleep(cancel, self.config.visible_poll_interval_ms)
                        .await?;
                }
                Err(_) => {
                    return Err(Error::Timeout(format!(
                        "waiting for visible element: {}",
                        cmd.target
                    )))
                }
            }
        }
    }

    // --- helpers ---------------------------------------------------------

    fn locator_matches_marker(&self, cmd: &Command) -> bool {
        let mut haystacks = vec![cmd.target.to_ascii_lowercase()];
        haystacks.extend(cmd.targets.iter().map(|t| t.to_ascii_lowercase()));
        self.config.dynamic_markers.iter().any(|marker| {
            haystacks.iter().any(|h| h.contains(marker.as_str()))
        })
    }

    fn is_reactive_target(&self, page: &Page, cmd: &Command, node: NodeId) -> bool {
        if self.locator_matches_marker(cmd) {
            return true;
        }
        let doc = page.doc();
        let mut haystacks = Vec::new();
        if let Some(id) = doc.attr(node, "id") {
            haystacks.push(id.to_ascii_lowercase());
        }
        if let Some(name) = doc.attr(node, "name") {
            haystacks.push(name.to_ascii_lowercase());
        }
        self.config.dynamic_markers.iter().any(|marker| {
            haystacks.iter().any(|h| h.contains(marker.as_str()))
        })
    }

    async fn sleep(&self, cancel: &CancellationToken, ms: u64) -> Result<()> {
        if ms == 0 {
            return Ok(());
        }
        tokio::select! {
            _ = cancel.cancelled() => Err(Error::Execution("playback stopped".into())),
            _ = tokio::time::sleep(Duration::from_millis(ms)) => Ok(()),
        }
    }
}

fn option_value(doc: &crate::dom::Document, option: NodeId) -> String {
    match doc.attr(option, "value") {
        Some(v) => v.to_string(),
        None => doc.computed_text(option).trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> Engine {
        Engine::with_config(EngineConfig {
            char_delay_ms: 10,
            settle_ms: 10,
            ..EngineConfig::default()
        })
    }

    fn click_cmd(target: &str) -> Command {
        Command::new(CommandKind::Click).with_target(target)
    }

    #[tokio::test(start_paused = true)]
    async fn click_dispatches_pointer_sequence_at_center() {
        let mut page = Page::from_html(r#"<button id="go">Go</button>"#, "about:test");
        let node = page.doc().element_by_id("go").unwrap();
        page.doc().set_bbox(node, crate::dom::Rect {
            x: 100.0,
            y: 40.0,
            width: 80.0,
            height: 20.0,
        });

        let outcome = engine()
            .execute(&mut page, &click_cmd("id=go"), None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.locator.as_deref(), Some("id=go"));

        let doc = page.doc();
        assert_eq!(
            doc.event_names(node),
            vec!["pointerdown", "mousedown", "pointerup", "mouseup", "click"]
        );
        assert_eq!(doc.events()[0].event.client, Some((140.0, 50.0)));
        assert_eq!(doc.highlights(), &[node]);
    }

    #[tokio::test(start_paused = true)]
    async fn click_focuses_editable_targets() {
        let mut page = Page::from_html(r#"<input id="q">"#, "about:test");
        let node = page.doc().element_by_id("q").unwrap();
        engine()
            .execute(&mut page, &click_cmd("id=q"), None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(page.doc().focused(), Some(node));
    }

    #[tokio::test(start_paused = true)]
    async fn fast_type_sets_value_and_fires_once() {
        let mut page = Page::from_html(r#"<input id="email" value="old">"#, "about:test");
        let node = page.doc().element_by_id("email").unwrap();
        let cmd = Command::new(CommandKind::Type)
            .with_target("id=email")
            .with_value("new@example.com");
        engine()
            .execute(&mut page, &cmd, None, &CancellationToken::new())
            .await
            .unwrap();
        let doc = page.doc();
        assert_eq!(doc.value(node), "new@example.com");
        let names = doc.event_names(node);
        assert!(names.ends_with(&["input", "change"]));
        assert_eq!(names.iter().filter(|n| **n == "input").count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reactive_type_goes_char_by_char_through_native_setter() {
        let mut page = Page::from_html(
            r#"<input id="city-autocomplete" name="city">"#,
            "about:test",
        );
        let node = page.doc().element_by_id("city-autocomplete").unwrap();
        page.doc().install_value_guard(node);

        let cmd = Command::new(CommandKind::Type)
            .with_target("id=city-autocomplete")
            .with_value("Lyon");
        engine()
            .execute(&mut page, &cmd, None, &CancellationToken::new())
            .await
            .unwrap();

        let doc = page.doc();
        assert_eq!(doc.value(node), "Lyon");
        let stats = doc.guard_stats(node).unwrap();
        assert_eq!(stats.property_writes, 0);
        assert!(stats.native_writes >= 4);
        let names = doc.event_names(node);
        assert_eq!(names.iter().filter(|n| **n == "keydown").count(), 4);
        assert_eq!(names.iter().filter(|n| **n == "input").count(), 4);
        assert!(names.contains(&"change"));
        // Autocomplete fields keep focus so the suggestion list stays up.
        assert!(!names.contains(&"blur"));
    }

    #[tokio::test(start_paused = true)]
    async fn select_matches_label_value_and_errors() {
        let html = r#"<select id="country">
            <option value="fr">France</option>
            <option value="de">Germany</option>
        </select>"#;
        let mut page = Page::from_html(html, "about:test");
        let node = page.doc().element_by_id("country").unwrap();
        let en = engine();
        let token = CancellationToken::new();

        let cmd = Command::new(CommandKind::Select)
            .with_target("id=country")
            .with_value("Germany");
        en.execute(&mut page, &cmd, None, &token).await.unwrap();
        assert_eq!(page.doc().value(node), "de");

        let cmd = cmd.with_value("value=fr");
        en.execute(&mut page, &cmd, None, &token).await.unwrap();
        assert_eq!(page.doc().value(node), "fr");

        let cmd = Command::new(CommandKind::Select)
            .with_target("id=country")
            .with_value("Spain");
        let err = en.execute(&mut page, &cmd, None, &token).await.unwrap_err();
        assert!(matches!(err, Error::OptionNotFound(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn check_and_uncheck_toggle_with_change() {
        let mut page = Page::from_html(r#"<input type="checkbox" id="tos">"#, "about:test");
        let node = page.doc().element_by_id("tos").unwrap();
        let en = engine();
        let token = CancellationToken::new();

        let check = Command::new(CommandKind::Check).with_target("id=tos");
        en.execute(&mut page, &check, None, &token).await.unwrap();
        assert!(page.doc().checked(node));

        let uncheck = Command::new(CommandKind::Uncheck).with_target("id=tos");
        en.execute(&mut page, &uncheck, None, &token).await.unwrap();
        assert!(!page.doc().checked(node));
        assert_eq!(page.doc().event_names(node).iter().filter(|n| **n == "change").count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_visible_times_out_with_specific_error() {
        let mut page = Page::from_html(
            r#"<div style="display:none"><p id="late">x</p></div>"#,
            "about:test",
        );
        let cmd = Command::new(CommandKind::WaitVisible).with_target("id=late");
        let err = engine()
            .execute(&mut page, &cmd, None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_visible_resolves_once_shown() {
        let mut page = Page::from_html(
            r#"<p id="msg" style="display:none">done</p>"#,
            "about:test",
        );
        let handle = page.doc_handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(600)).await;
            let mut doc = handle.lock().unwrap();
            let node = doc.element_by_id("msg").unwrap();
            doc.set_attr(node, "style", "display:block");
        });

        let cmd = Command::new(CommandKind::WaitVisible).with_target("id=msg");
        let outcome = engine()
            .execute(&mut page, &cmd, None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.locator.as_deref(), Some("id=msg"));
    }

    #[tokio::test(start_paused = true)]
    async fn dynamic_widget_click_polls_until_target_exists() {
        let mut page = Page::from_html(
            r#"<div id="results-listbox"></div>"#,
            "about:test",
        );
        let handle = page.doc_handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(700)).await;
            let mut doc = handle.lock().unwrap();
            let listbox = doc.element_by_id("results-listbox").unwrap();
            doc.append_element(listbox, "li", &[("id", "listbox-item-1")]);
        });

        let cmd = click_cmd("id=listbox-item-1");
        let outcome = engine()
            .execute(&mut page, &cmd, None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.locator.as_deref(), Some("id=listbox-item-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn pause_reads_value_with_target_fallback() {
        let mut page = Page::from_html("<p>x</p>", "about:test");
        let en = engine();
        let token = CancellationToken::new();

        let start = tokio::time::Instant::now();
        let cmd = Command::new(CommandKind::Pause).with_value("250");
        en.execute(&mut page, &cmd, None, &token).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(250));

        let start = tokio::time::Instant::now();
        let cmd = Command::new(CommandKind::Pause).with_target("150");
        en.execute(&mut page, &cmd, None, &token).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(150));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_aborts_a_pause() {
        let mut page = Page::from_html("<p>x</p>", "about:test");
        let token = CancellationToken::new();
        token.cancel();
        let cmd = Command::new(CommandKind::Pause).with_value("60000");
        let err = engine()
            .execute(&mut page, &cmd, None, &token)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Execution(_)));
    }
}
