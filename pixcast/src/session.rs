use std::sync::Arc;

use crossbeam::channel::{unbounded, Receiver, Sender};

use crate::lifecycle::{AsyncProcessor, ProcessorError};

/// Supervises the processors of a mirroring session (video, audio, control).
///
/// A processor ending without error (the audio source is missing, the viewer
/// closed the connection) leaves the others running, a fatal termination
/// stops all of them.
pub struct Session {
    processors: Vec<Box<dyn AsyncProcessor>>,
    terminations: (Sender<(usize, bool)>, Receiver<(usize, bool)>),
    started: usize,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            processors: Vec::with_capacity(3),
            terminations: unbounded(),
            started: 0,
        }
    }

    pub fn add<P: AsyncProcessor + 'static>(&mut self, processor: P) -> &mut Self {
        self.processors.push(Box::new(processor));
        self
    }

    /// Start every processor. If one fails to start, the ones already started
    /// are stopped and joined.
    pub fn start(&mut self) -> Result<(), ProcessorError> {
        while self.started < self.processors.len() {
            let index = self.started;
            let tx = self.terminations.0.clone();
            let processor = &mut self.processors[index];
            if let Err(e) = processor.start(Arc::new(move |fatal: bool| {
                let _ = tx.send((index, fatal));
            })) {
                log::error!("session failed to start {}, error={:?}", processor.name(), e);

                self.stop();
                self.join();
                return Err(e);
            }

            log::info!("session started {}", processor.name());

            self.started += 1;
        }

        Ok(())
    }

    /// Block until every started processor terminated or one of them failed.
    /// Returns whether a fatal termination happened, in which case all the
    /// processors were asked to stop.
    pub fn wait(&self) -> bool {
        let mut running = self.started;
        while running > 0 {
            let Ok((index, fatal)) = self.terminations.1.recv() else {
                break;
            };

            running -= 1;
            let name = self.processors[index].name();
            if fatal {
                log::error!("session {} terminated with a fatal error, stopping", name);

                self.stop();
                return true;
            }

            log::info!("session {} terminated", name);
        }

        false
    }

    /// Ask every processor to stop, does not wait.
    pub fn stop(&self) {
        for processor in &self.processors {
            processor.stop();
        }
    }

    pub fn join(&mut self) {
        for processor in &mut self.processors {
            processor.join();
        }
    }

    /// Start, wait, then stop and join everything. Returns whether the
    /// session ended on a fatal error.
    pub fn run(mut self) -> Result<bool, ProcessorError> {
        self.start()?;

        let fatal = self.wait();
        self.stop();
        self.join();

        Ok(fatal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::{
        sync::atomic::AtomicBool,
        thread::{self, JoinHandle},
        time::Duration,
    };

    use common::atomic::EasyAtomic;

    use crate::{
        encoder::EncoderError,
        lifecycle::{self, TerminationListener},
    };

    enum Outcome {
        Clean,
        Fatal,
        UntilStopped,
    }

    struct FakeProcessor {
        name: &'static str,
        outcome: Option<Outcome>,
        stopped: Arc<AtomicBool>,
        handle: Option<JoinHandle<()>>,
    }

    impl FakeProcessor {
        fn new(name: &'static str, outcome: Outcome) -> (Self, Arc<AtomicBool>) {
            let stopped: Arc<AtomicBool> = Default::default();
            let processor = Self {
                outcome: Some(outcome),
                stopped: stopped.clone(),
                handle: None,
                name,
            };

            (processor, stopped)
        }
    }

    impl AsyncProcessor for FakeProcessor {
        fn name(&self) -> &str {
            self.name
        }

        fn start(&mut self, listener: Arc<dyn TerminationListener>) -> Result<(), ProcessorError> {
            let outcome = self.outcome.take().ok_or(ProcessorError::AlreadyStarted)?;
            let stopped = self.stopped.clone();

            self.handle = Some(lifecycle::spawn(self.name, listener, move || match outcome {
                Outcome::Clean => Ok(()),
                Outcome::Fatal => Err(EncoderError::Failed("fake".to_string()).into()),
                Outcome::UntilStopped => {
                    while !stopped.get() {
                        thread::sleep(Duration::from_millis(5));
                    }

                    Ok(())
                }
            })?);

            Ok(())
        }

        fn stop(&self) {
            self.stopped.set(true);
        }

        fn join(&mut self) {
            lifecycle::join(self.name, &mut self.handle);
        }
    }

    #[test]
    fn fatal_termination_stops_everything() {
        let (video, video_stopped) = FakeProcessor::new("video", Outcome::UntilStopped);
        let (audio, _) = FakeProcessor::new("audio", Outcome::Fatal);

        let mut session = Session::new();
        session.add(video).add(audio);

        assert!(session.run().unwrap());
        assert!(video_stopped.get());
    }

    #[test]
    fn clean_termination_keeps_others_running() {
        let (video, video_stopped) = FakeProcessor::new("video", Outcome::UntilStopped);
        let (audio, _) = FakeProcessor::new("audio", Outcome::Clean);

        let mut session = Session::new();
        session.add(video).add(audio);
        session.start().unwrap();

        // only the audio terminated
        let (index, fatal) = session.terminations.1.recv().unwrap();
        assert_eq!((index, fatal), (1, false));
        assert!(!video_stopped.get());

        session.stop();
        let (index, fatal) = session.terminations.1.recv().unwrap();
        assert_eq!((index, fatal), (0, false));

        session.join();
    }

    #[test]
    fn wait_returns_when_all_terminated() {
        let (video, _) = FakeProcessor::new("video", Outcome::Clean);
        let (control, _) = FakeProcessor::new("control", Outcome::Clean);

        let mut session = Session::new();
        session.add(video).add(control);
        assert!(!session.run().unwrap());
    }
}
