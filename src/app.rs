use std::time::{Duration, Instant};

use chrono::Utc;
use crossbeam_channel::Receiver;
use egui::{
    emath::Rot2, epaint::TextShape, Align2, Color32, FontId, Id, LayerId, Margin, Order, Pos2,
    Rect, RichText, Shape, Stroke, Vec2,
};
use rand::{rngs::StdRng, SeedableRng};
use tracing::{debug, info, warn};

use crate::{
    bubbles::VisibleBubble,
    config::{AppConfig, LaunchOverrides},
    confetti::{hue_color, ConfettiBurst, ConfettiDrift},
    countdown::{format_remaining, Countdown, CountdownPhase, CountdownSignal},
    error::BlessingError,
    events::{IncomingMessage, MAX_NAME_CHARS, MAX_TEXT_CHARS},
    placement::Viewport,
    scheduler::SpawnScheduler,
    submission::SubmissionForm,
    workers::{RemoteCommand, RemoteLink},
};

const FRAME_INTERVAL: Duration = Duration::from_millis(16);
const IDLE_FRAME_INTERVAL: Duration = Duration::from_millis(33);
const NOTICE_TTL: Duration = Duration::from_secs(6);
const BUBBLE_FADE_SECS: f32 = 0.35;
const BUBBLE_WRAP_WIDTH: f32 = 220.0;
const OVERLAY_TEXT: &str = "🎆 2026 🎆";

pub struct BlessingApp {
    events: Receiver<IncomingMessage>,
    remote: Option<RemoteLink>,
    config: AppConfig,
    countdown: Countdown,
    scheduler: SpawnScheduler,
    form: SubmissionForm,
    burst: ConfettiBurst,
    drift: ConfettiDrift,
    celebrated_at: Option<Instant>,
    rng: StdRng,
    presence_enabled: bool,
    presence_count: Option<usize>,
    realtime_status: Option<(String, bool)>,
    notice: Option<(BlessingError, Instant)>,
    stage: Option<Rect>,
}

impl BlessingApp {
    pub fn new(
        events: Receiver<IncomingMessage>,
        remote: Option<RemoteLink>,
        config: AppConfig,
        overrides: LaunchOverrides,
    ) -> Self {
        let wall = Utc::now();
        let now = Instant::now();
        let target = overrides.resolve_target(config.target_time, wall);
        if overrides.test_multiplier.is_some() {
            info!(target = %target, "countdown rehearsal target");
        }

        let mut rng = StdRng::from_entropy();
        let drift = ConfettiDrift::new(&mut rng);
        let notice = remote
            .is_none()
            .then(|| (BlessingError::ConfigurationMissing, now));

        Self {
            events,
            remote,
            config,
            countdown: Countdown::new(target, wall),
            scheduler: SpawnScheduler::from_entropy(),
            form: SubmissionForm::default(),
            burst: ConfettiBurst::default(),
            drift,
            celebrated_at: None,
            rng,
            presence_enabled: overrides.presence_enabled,
            presence_count: None,
            realtime_status: None,
            notice,
            stage: None,
        }
    }

    fn configured(&self) -> bool {
        self.remote.is_some()
    }

    fn drain_events(&mut self, now: Instant) {
        while let Ok(message) = self.events.try_recv() {
            match message {
                IncomingMessage::InitialBatch(rows) => {
                    info!(rows = rows.len(), "initial blessings received");
                    self.scheduler.ingest_initial(rows, now);
                    debug!(
                        pool = self.scheduler.pool().len(),
                        reveal_pending = self.scheduler.reveal_pending(),
                        resurfacing = self.scheduler.is_resurfacing(),
                        "reveal scheduled"
                    );
                }
                IncomingMessage::InitialLoadFailed(err) => {
                    // No retry; live inserts still show up as fresh bubbles.
                    self.notice = Some((BlessingError::FetchFailure(err), now));
                }
                IncomingMessage::Inserted(record) => {
                    debug!(id = %record.id, "live blessing");
                    self.scheduler.ingest_live(record, now);
                }
                IncomingMessage::PresenceCount(count) => {
                    self.presence_count = Some(count);
                }
                IncomingMessage::SubmitFinished(result) => {
                    self.form.finish_submit(result, now);
                }
                IncomingMessage::RealtimeStatus { status, connected } => {
                    debug!(%status, connected, "realtime status");
                    self.realtime_status = Some((status, connected));
                }
            }
        }
    }

    fn handle_countdown_signals(&mut self, signals: Vec<CountdownSignal>, now: Instant) {
        for signal in signals {
            match signal {
                CountdownSignal::Celebrate { burst } => {
                    self.burst.launch(now, burst);
                    self.celebrated_at.get_or_insert(now);
                }
                CountdownSignal::OverlayHidden => debug!("celebration overlay hidden"),
                CountdownSignal::ArrivedLabelShown => debug!("arrived label shown"),
            }
        }
    }

    fn submit(&mut self, now: Instant) {
        let configured = self.configured();
        let Some(payload) = self.form.begin_submit(&self.config.room_id, configured, now) else {
            return;
        };
        let sent = self
            .remote
            .as_ref()
            .map(|remote| remote.commands.send(RemoteCommand::Submit(payload)).is_ok())
            .unwrap_or(false);
        if !sent {
            warn!("submit worker is not running");
            self.form
                .finish_submit(Err("submit worker is not running".to_owned()), now);
        }
    }

    fn prune_notice(&mut self, now: Instant) {
        let expired = self.notice.as_ref().is_some_and(|(err, at)| {
            !err.is_persistent() && now.saturating_duration_since(*at) >= NOTICE_TTL
        });
        if expired {
            self.notice = None;
        }
    }

    fn draw_form(&mut self, ctx: &egui::Context, now: Instant) {
        let mut submit_requested = false;
        egui::TopBottomPanel::bottom("blessing_form")
            .frame(
                egui::Frame::none()
                    .fill(Color32::from_rgba_unmultiplied(255, 255, 255, 235))
                    .inner_margin(Margin::symmetric(20.0, 14.0)),
            )
            .show(ctx, |ui| {
                ui.horizontal(|ui| {
                    ui.checkbox(&mut self.form.draft.anonymous, "Anonymous");
                    ui.add_enabled(
                        !self.form.draft.anonymous,
                        egui::TextEdit::singleline(&mut self.form.draft.name)
                            .char_limit(MAX_NAME_CHARS)
                            .hint_text("Nickname (max 12)")
                            .desired_width(180.0),
                    );
                });
                ui.add_space(6.0);
                ui.horizontal(|ui| {
                    let text_width = (ui.available_width() - 90.0).max(120.0);
                    let response = ui.add(
                        egui::TextEdit::singleline(&mut self.form.draft.text)
                            .char_limit(MAX_TEXT_CHARS)
                            .hint_text("Leave a blessing for the new year (max 30)")
                            .desired_width(text_width),
                    );
                    let enter_pressed =
                        response.lost_focus() && ui.input(|input| input.key_pressed(egui::Key::Enter));
                    let can_submit = self.form.can_submit(now);
                    let clicked = ui
                        .add_enabled(
                            can_submit,
                            egui::Button::new(self.form.button_label(now)).min_size(Vec2::new(72.0, 28.0)),
                        )
                        .clicked();
                    if clicked || (enter_pressed && can_submit) {
                        submit_requested = true;
                    }
                });

                let status_line = self
                    .form
                    .status()
                    .message()
                    .map(|message| (message, status_color(self.form.status().is_failure())))
                    .or_else(|| {
                        self.notice
                            .as_ref()
                            .map(|(err, _)| (err.user_message(), status_color(true)))
                    });
                if let Some((message, color)) = status_line {
                    ui.add_space(4.0);
                    ui.label(RichText::new(message).size(13.0).color(color));
                }
            });
        if submit_requested {
            self.submit(now);
        }
    }

    fn draw_stage(&self, ctx: &egui::Context) -> Rect {
        let phase = self.countdown.phase();
        let headline = if self.countdown.is_zero() {
            "Happy New Year! 🎉"
        } else {
            "Counting down to the new year together"
        };
        let countdown_text = if self.countdown.show_arrived_label() {
            self.config.arrived_label.clone()
        } else {
            format_remaining(self.countdown.remaining_ms())
        };

        egui::CentralPanel::default()
            .frame(egui::Frame::none().fill(phase_background(phase)))
            .show(ctx, |ui| {
                let stage = ui.max_rect();
                ui.vertical_centered(|ui| {
                    ui.add_space(40.0);
                    ui.label(
                        RichText::new("HAPPY NEW YEAR 2026")
                            .size(14.0)
                            .strong()
                            .color(Color32::from_rgb(180, 83, 9)),
                    );
                    ui.add_space(12.0);
                    ui.label(
                        RichText::new(headline)
                            .size(24.0)
                            .color(Color32::from_rgb(51, 65, 85)),
                    );
                });

                let painter = ui.painter();
                let size = if phase >= CountdownPhase::Within10s { 88.0 } else { 72.0 };
                painter.text(
                    stage.center(),
                    Align2::CENTER_CENTER,
                    countdown_text,
                    FontId::monospace(size),
                    phase_accent(phase),
                );
                painter.text(
                    stage.center() + Vec2::new(0.0, size * 0.8),
                    Align2::CENTER_TOP,
                    "Blessings float by and fade after 10 seconds",
                    FontId::proportional(15.0),
                    Color32::from_rgb(100, 116, 139),
                );
                stage
            })
            .inner
    }

    fn draw_bubbles(&self, ctx: &egui::Context, stage: Rect, now: Instant) {
        let painter = ctx.layer_painter(LayerId::new(Order::Foreground, Id::new("blessing_bubbles")));
        for bubble in self.scheduler.visible() {
            draw_bubble(&painter, stage, bubble, now);
        }
    }

    fn draw_celebration(&self, ctx: &egui::Context, stage: Rect, now: Instant) {
        if let Some(started) = self.celebrated_at {
            let painter =
                ctx.layer_painter(LayerId::new(Order::Middle, Id::new("confetti_drift")));
            self.drift
                .draw(&painter, stage, now.saturating_duration_since(started));
        }

        let painter = ctx.layer_painter(LayerId::new(Order::Tooltip, Id::new("celebration")));
        if self.countdown.overlay_visible() {
            painter.rect_filled(stage, 0.0, Color32::from_rgba_unmultiplied(15, 23, 42, 120));
            painter.text(
                stage.center(),
                Align2::CENTER_CENTER,
                OVERLAY_TEXT,
                FontId::proportional(96.0),
                Color32::from_rgb(253, 224, 71),
            );
        }
        self.burst.draw(&painter, ctx.screen_rect(), now);
    }

    fn draw_status_pills(&self, ctx: &egui::Context) {
        if let Some((status, connected)) = &self.realtime_status {
            let color = if *connected {
                Color32::from_rgb(22, 163, 74)
            } else {
                Color32::from_rgb(148, 163, 184)
            };
            status_pill(ctx, "realtime_pill", Align2::LEFT_TOP, Vec2::new(16.0, 16.0), |ui| {
                ui.label(RichText::new(format!("● {status}")).size(12.0).color(color));
            });
        }

        if !self.presence_enabled {
            return;
        }
        let Some(count) = self.presence_count else {
            return;
        };
        status_pill(ctx, "presence_pill", Align2::RIGHT_TOP, Vec2::new(-16.0, 16.0), |ui| {
            ui.label(
                RichText::new(format!("online now: {count}"))
                    .size(13.0)
                    .color(Color32::from_rgb(194, 65, 12)),
            );
        });
    }
}

fn status_pill(
    ctx: &egui::Context,
    id: &str,
    anchor: Align2,
    offset: Vec2,
    add_contents: impl FnOnce(&mut egui::Ui),
) {
    egui::Area::new(Id::new(id))
        .anchor(anchor, offset)
        .interactable(false)
        .show(ctx, |ui| {
            egui::Frame::none()
                .fill(Color32::from_rgba_unmultiplied(255, 255, 255, 220))
                .stroke(Stroke::new(1.0, Color32::from_rgb(253, 186, 116)))
                .rounding(14.0)
                .inner_margin(Margin::symmetric(12.0, 5.0))
                .show(ui, add_contents);
        });
}

impl eframe::App for BlessingApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        let now = Instant::now();
        self.drain_events(now);

        let signals = self.countdown.poll(Utc::now());
        self.handle_countdown_signals(signals, now);

        if let Some(stage) = self.stage {
            self.scheduler
                .set_viewport(Viewport::new(stage.width(), stage.height()));
        }
        self.scheduler.tick(now);
        self.burst.step(now, &mut self.rng);
        self.prune_notice(now);

        self.draw_form(ctx, now);
        let stage = self.draw_stage(ctx);
        self.stage = Some(stage);
        self.draw_bubbles(ctx, stage, now);
        self.draw_celebration(ctx, stage, now);
        self.draw_status_pills(ctx);

        let mut interval = if self.burst.is_active() || !self.scheduler.visible().is_empty() {
            FRAME_INTERVAL
        } else {
            IDLE_FRAME_INTERVAL
        };
        if let Some(deadline) = self.scheduler.next_deadline() {
            interval = interval.min(deadline.saturating_duration_since(now));
        }
        ctx.request_repaint_after(interval);
    }
}

impl Drop for BlessingApp {
    fn drop(&mut self) {
        debug!(
            pending_timers = self.scheduler.pending_timers(),
            recent = self.scheduler.recent().len(),
            "cancelling bubble timers"
        );
        self.scheduler.teardown();
        if let Some(remote) = self.remote.as_mut() {
            remote.handles.shutdown();
        }
        info!("blessing page torn down");
    }
}

fn draw_bubble(painter: &egui::Painter, stage: Rect, bubble: &VisibleBubble, now: Instant) {
    let alpha = bubble_alpha(bubble, now);
    if alpha <= 0.0 {
        return;
    }
    let hue = f32::from(bubble.hue);
    let text_color = fade(Color32::from_rgb(30, 41, 59), alpha);
    let name_color = fade(hue_color(hue, 0.75, 0.55, 1.0), alpha);

    let text_galley = painter.layout(
        bubble.text.clone(),
        FontId::proportional(17.0),
        text_color,
        BUBBLE_WRAP_WIDTH,
    );
    let name_galley = bubble
        .name
        .as_ref()
        .map(|name| painter.layout_no_wrap(name.clone(), FontId::proportional(12.0), name_color));
    let name_height = name_galley
        .as_ref()
        .map(|galley| galley.size().y + 3.0)
        .unwrap_or(0.0);
    let content_width = name_galley
        .as_ref()
        .map(|galley| galley.size().x)
        .unwrap_or(0.0)
        .max(text_galley.size().x);
    let padding = Vec2::new(14.0, 10.0);
    let size = Vec2::new(content_width, name_height + text_galley.size().y) + padding * 2.0;

    let anchor = Pos2::new(
        stage.left() + bubble.position.x / 100.0 * stage.width(),
        stage.top() + bubble.position.y / 100.0 * stage.height(),
    );
    let rect = Rect::from_min_size(anchor, size);
    let angle = f32::from(bubble.tilt).to_radians();
    let rotation = Rot2::from_angle(angle);
    let center = rect.center();
    let rotate = |point: Pos2| center + rotation * (point - center);

    let corners = |rect: Rect| {
        [rect.left_top(), rect.right_top(), rect.right_bottom(), rect.left_bottom()]
            .map(rotate)
            .to_vec()
    };
    if bubble.fresh {
        painter.add(Shape::closed_line(
            corners(rect.expand(4.0)),
            Stroke::new(2.5, fade(hue_color(hue, 0.6, 1.0, 0.6), alpha)),
        ));
    }
    painter.add(Shape::convex_polygon(
        corners(rect),
        fade(hue_color(hue, 0.08, 1.0, 0.95), alpha),
        Stroke::new(1.5, fade(hue_color(hue, 0.45, 0.95, 1.0), alpha)),
    ));

    let mut cursor = rect.min + padding;
    if let Some(galley) = name_galley {
        painter.add(TextShape::new(rotate(cursor), galley, name_color).with_angle(angle));
        cursor.y += name_height;
    }
    painter.add(TextShape::new(rotate(cursor), text_galley, text_color).with_angle(angle));
}

fn bubble_alpha(bubble: &VisibleBubble, now: Instant) -> f32 {
    let age = now.saturating_duration_since(bubble.born_at).as_secs_f32();
    let left = bubble.expires_at.saturating_duration_since(now).as_secs_f32();
    let fade_in = (age / BUBBLE_FADE_SECS).min(1.0);
    let fade_out = (left / BUBBLE_FADE_SECS).min(1.0);
    fade_in.min(fade_out).clamp(0.0, 1.0)
}

fn fade(color: Color32, alpha: f32) -> Color32 {
    color.gamma_multiply(alpha)
}

fn phase_background(phase: CountdownPhase) -> Color32 {
    match phase {
        CountdownPhase::Normal => Color32::from_rgb(255, 247, 237),
        CountdownPhase::Within60s => Color32::from_rgb(255, 237, 213),
        CountdownPhase::Within30s => Color32::from_rgb(254, 215, 170),
        CountdownPhase::Within10s => Color32::from_rgb(254, 202, 202),
        CountdownPhase::Arrived => Color32::from_rgb(254, 243, 199),
    }
}

fn phase_accent(phase: CountdownPhase) -> Color32 {
    match phase {
        CountdownPhase::Normal => Color32::from_rgb(15, 23, 42),
        CountdownPhase::Within60s => Color32::from_rgb(217, 119, 6),
        CountdownPhase::Within30s => Color32::from_rgb(234, 88, 12),
        CountdownPhase::Within10s => Color32::from_rgb(220, 38, 38),
        CountdownPhase::Arrived => Color32::from_rgb(202, 138, 4),
    }
}

fn status_color(failure: bool) -> Color32 {
    if failure {
        Color32::from_rgb(220, 38, 38)
    } else {
        Color32::from_rgb(22, 163, 74)
    }
}
