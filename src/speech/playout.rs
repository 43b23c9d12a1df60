//! Audio playout worker for remote synthesis payloads
//!
//! Rodio's output stream is not `Send`, so a dedicated thread owns it and
//! is driven over a command channel. The thread holds at most one active
//! sink; the wav payload and sink live in that slot and are dropped
//! together on finish, stop and failure alike.

use std::io::Cursor;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use rodio::{Decoder, OutputStream, Sink};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// How one playout request ended
#[derive(Debug)]
pub enum PlayoutEnd {
    /// Audio reached its natural end
    Finished,
    /// Playback was stopped before the end
    Stopped,
    /// The payload could not be decoded or played
    Failed(String),
}

enum PlayoutCommand {
    Play {
        wav: Vec<u8>,
        speed: f32,
        done: oneshot::Sender<PlayoutEnd>,
    },
    Pause,
    Resume,
    Stop,
    SetSpeed(f32),
    Shutdown,
}

/// Handle to the playout thread
pub struct Playout {
    command_tx: Sender<PlayoutCommand>,
}

impl Playout {
    /// Spawn the playout worker thread.
    pub fn spawn() -> Self {
        let (command_tx, command_rx) = bounded(16);

        thread::spawn(move || {
            info!("playout worker starting");

            // The output stream must be created on the thread that keeps it
            // alive. Without a device the worker stays up and fails each
            // request, which the player absorbs through backend fallback.
            let stream = OutputStream::try_default();
            let handle = match &stream {
                Ok((_, handle)) => Some(handle.clone()),
                Err(e) => {
                    warn!("no audio output device: {}", e);
                    None
                }
            };

            let mut active: Option<(Sink, oneshot::Sender<PlayoutEnd>)> = None;
            let mut paused = false;

            loop {
                match command_rx.recv_timeout(Duration::from_millis(10)) {
                    Ok(PlayoutCommand::Play { wav, speed, done }) => {
                        if let Some((sink, prev_done)) = active.take() {
                            sink.stop();
                            let _ = prev_done.send(PlayoutEnd::Stopped);
                        }

                        let Some(handle) = &handle else {
                            let _ = done
                                .send(PlayoutEnd::Failed("no audio output device".to_string()));
                            continue;
                        };

                        let source = match Decoder::new(Cursor::new(wav)) {
                            Ok(source) => source,
                            Err(e) => {
                                let _ = done
                                    .send(PlayoutEnd::Failed(format!("decode failed: {}", e)));
                                continue;
                            }
                        };

                        match Sink::try_new(handle) {
                            Ok(sink) => {
                                sink.set_speed(speed);
                                sink.append(source);
                                if paused {
                                    sink.pause();
                                }
                                active = Some((sink, done));
                            }
                            Err(e) => {
                                let _ =
                                    done.send(PlayoutEnd::Failed(format!("sink failed: {}", e)));
                            }
                        }
                    }
                    Ok(PlayoutCommand::Pause) => {
                        paused = true;
                        if let Some((sink, _)) = &active {
                            sink.pause();
                        }
                    }
                    Ok(PlayoutCommand::Resume) => {
                        paused = false;
                        if let Some((sink, _)) = &active {
                            sink.play();
                        }
                    }
                    Ok(PlayoutCommand::Stop) => {
                        paused = false;
                        if let Some((sink, done)) = active.take() {
                            sink.stop();
                            let _ = done.send(PlayoutEnd::Stopped);
                        }
                    }
                    Ok(PlayoutCommand::SetSpeed(speed)) => {
                        if let Some((sink, _)) = &active {
                            debug!("live rate change to {}", speed);
                            sink.set_speed(speed);
                        }
                    }
                    Ok(PlayoutCommand::Shutdown) => {
                        if let Some((sink, done)) = active.take() {
                            sink.stop();
                            let _ = done.send(PlayoutEnd::Stopped);
                        }
                        break;
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }

                // A paused sink is never empty, so this only fires on
                // natural completion.
                let ended = matches!(&active, Some((sink, _)) if sink.empty());
                if ended {
                    if let Some((_, done)) = active.take() {
                        let _ = done.send(PlayoutEnd::Finished);
                    }
                }
            }

            info!("playout worker stopped");
        });

        Self { command_tx }
    }

    /// Queue one wav payload. The returned receiver resolves when the audio
    /// ends, is stopped, or fails; it errs if the worker goes away.
    pub fn play(&self, wav: Vec<u8>, speed: f32) -> oneshot::Receiver<PlayoutEnd> {
        let (done_tx, done_rx) = oneshot::channel();
        if self
            .command_tx
            .send(PlayoutCommand::Play {
                wav,
                speed,
                done: done_tx,
            })
            .is_err()
        {
            error!("playout worker unavailable");
        }
        done_rx
    }

    pub fn pause(&self) {
        let _ = self.command_tx.send(PlayoutCommand::Pause);
    }

    pub fn resume(&self) {
        let _ = self.command_tx.send(PlayoutCommand::Resume);
    }

    pub fn stop(&self) {
        let _ = self.command_tx.send(PlayoutCommand::Stop);
    }

    pub fn set_speed(&self, speed: f32) {
        let _ = self.command_tx.send(PlayoutCommand::SetSpeed(speed));
    }
}

impl Drop for Playout {
    fn drop(&mut self) {
        let _ = self.command_tx.send(PlayoutCommand::Shutdown);
    }
}
