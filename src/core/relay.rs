use crate::core::dispatcher::CommandDispatcher;
use crate::core::hub::{Subscription, TelemetryHub};
use crate::core::session::DeviceSession;
use crate::domain::events::{ClientRequest, ServerEvent, TranslationStatus};
use crate::domain::model::DispatchReport;
use crate::domain::ports::Translator;
use crate::utils::error::RelayError;
use std::sync::Arc;
use tokio::sync::mpsc;

const PROGRESS_QUEUE_DEPTH: usize = 16;

/// Maps client requests onto the device session, dispatcher and hub.
#[derive(Clone)]
pub struct RelayEngine {
    session: DeviceSession,
    dispatcher: CommandDispatcher,
    hub: TelemetryHub,
    translator: Option<Arc<dyn Translator>>,
}

impl RelayEngine {
    pub fn new(
        session: DeviceSession,
        dispatcher: CommandDispatcher,
        hub: TelemetryHub,
        translator: Option<Arc<dyn Translator>>,
    ) -> Self {
        Self {
            session,
            dispatcher,
            hub,
            translator,
        }
    }

    /// Registers a new client and returns its subscription and greeting.
    pub async fn connect(&self) -> (Subscription, ServerEvent) {
        let subscription = self.hub.subscribe();
        let ports = self.session.list_available().await;
        (subscription, ServerEvent::SerialPorts { ports })
    }

    /// Handles one request, emitting its events in order.
    pub async fn handle(&self, request: ClientRequest, events: &mpsc::Sender<ServerEvent>) {
        match request {
            ClientRequest::ListPorts => {
                let ports = self.session.list_available().await;
                emit(events, ServerEvent::SerialPorts { ports }).await;
            }
            ClientRequest::Open { path } => {
                let event = self.open(path).await;
                emit(events, event).await;
            }
            ClientRequest::Send { command } => {
                let report = self.dispatch(&command, events).await;
                if report.outcomes.is_empty() && report.rejected.is_empty() {
                    emit(
                        events,
                        ServerEvent::CommandSent {
                            success: false,
                            command: Some(command.trim().to_string()),
                            error: Some("Not a command, expected '<servo> <angle>'".to_string()),
                        },
                    )
                    .await;
                }
            }
            ClientRequest::Process { text } => self.process(&text, events).await,
            ClientRequest::Close => {
                let event = match self.session.close().await {
                    Ok(_) => ServerEvent::SerialClosed {
                        success: true,
                        error: None,
                    },
                    Err(e) => ServerEvent::SerialClosed {
                        success: false,
                        error: Some(e.user_friendly_message()),
                    },
                };
                emit(events, event).await;
            }
        }
    }

    async fn open(&self, path: Option<String>) -> ServerEvent {
        let Some(path) = path else {
            let e = RelayError::OpenError {
                path: String::new(),
                reason: "Serial port path is required".to_string(),
            };
            return ServerEvent::SerialConnected {
                success: false,
                port: None,
                error: Some(e.user_friendly_message()),
            };
        };

        let hub = self.hub.clone();
        let opened = self
            .session
            .open(&path, move |line| {
                hub.publish(line);
            })
            .await;

        match opened {
            Ok(()) => ServerEvent::SerialConnected {
                success: true,
                port: Some(path),
                error: None,
            },
            Err(e) => {
                tracing::error!("Error connecting to serial port: {}", e);
                ServerEvent::SerialConnected {
                    success: false,
                    port: None,
                    error: Some(e.user_friendly_message()),
                }
            }
        }
    }

    async fn process(&self, text: &str, events: &mpsc::Sender<ServerEvent>) {
        tracing::info!("Processing user command: {}", text);
        emit(
            events,
            ServerEvent::LlmResponse {
                status: TranslationStatus::Processing,
                message: "Processing your command...".to_string(),
            },
        )
        .await;

        let Some(translator) = &self.translator else {
            emit(
                events,
                ServerEvent::LlmResponse {
                    status: TranslationStatus::Error,
                    message: "Natural-language control is not configured".to_string(),
                },
            )
            .await;
            return;
        };

        let response = match translator.translate(text).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!("Error processing command: {}", e);
                emit(
                    events,
                    ServerEvent::LlmResponse {
                        status: TranslationStatus::Error,
                        message: e.user_friendly_message(),
                    },
                )
                .await;
                return;
            }
        };

        tracing::info!("LLM response: {}", response);
        emit(
            events,
            ServerEvent::LlmResponse {
                status: TranslationStatus::Completed,
                message: response.clone(),
            },
        )
        .await;

        // 回覆若不含指令則只是說明文字
        if self.dispatcher.validator().contains_commands(&response) {
            self.dispatch(&response, events).await;
        }
    }

    /// Dispatches `text`, emitting one `command_sent` per line as it completes.
    async fn dispatch(&self, text: &str, events: &mpsc::Sender<ServerEvent>) -> DispatchReport {
        let (progress_tx, mut progress_rx) = mpsc::channel(PROGRESS_QUEUE_DEPTH);
        let forward = async {
            while let Some(entry) = progress_rx.recv().await {
                emit(events, ServerEvent::from(entry)).await;
            }
        };

        let (report, ()) = tokio::join!(
            self.dispatcher.dispatch_with_progress(text, progress_tx),
            forward
        );
        report
    }
}

async fn emit(events: &mpsc::Sender<ServerEvent>, event: ServerEvent) {
    if events.send(event).await.is_err() {
        tracing::debug!("Client went away before its event could be delivered");
    }
}
