use crate::ForestError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::info;

/// Pipeline stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Parsing,
    Preprocessing,
    InitialSplit,
    ReferenceSplit,
    SubsubtrainSplit,
    Learning,
    Reduction,
    Quality,
    ClassesMatrices,
    ClusteringTrees,
    Ending,
}

impl Phase {
    pub const ALL: [Phase; 11] = [
        Phase::Parsing,
        Phase::Preprocessing,
        Phase::InitialSplit,
        Phase::ReferenceSplit,
        Phase::SubsubtrainSplit,
        Phase::Learning,
        Phase::Reduction,
        Phase::Quality,
        Phase::ClassesMatrices,
        Phase::ClusteringTrees,
        Phase::Ending,
    ];

    pub fn ordinal(self) -> usize {
        self as usize
    }

    pub fn next(self) -> Option<Phase> {
        Self::ALL.get(self.ordinal() + 1).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            Phase::Parsing => "parsing",
            Phase::Preprocessing => "preprocessing",
            Phase::InitialSplit => "initial_split",
            Phase::ReferenceSplit => "reference_split",
            Phase::SubsubtrainSplit => "subsubtrain_split",
            Phase::Learning => "learning",
            Phase::Reduction => "reduction",
            Phase::Quality => "quality",
            Phase::ClassesMatrices => "classes_matrices",
            Phase::ClusteringTrees => "clustering_trees",
            Phase::Ending => "ending",
        }
    }

    /// A stage may run when nothing after the stage following `last_completed`
    /// would be skipped. `None` means no stage has completed yet.
    pub fn is_processable(candidate: Phase, last_completed: Option<Phase>) -> bool {
        match last_completed {
            Some(last) => candidate.ordinal() <= last.ordinal() + 1,
            None => candidate == Phase::Parsing,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Phase {
    type Err = ForestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_lowercase().replace('-', "_");
        let phase = match key.as_str() {
            "parsing" | "parse" => Phase::Parsing,
            "preprocessing" | "preprocess" => Phase::Preprocessing,
            "initial_split" => Phase::InitialSplit,
            "reference_split" => Phase::ReferenceSplit,
            "subsubtrain_split" => Phase::SubsubtrainSplit,
            "learning" | "learn" => Phase::Learning,
            "reduction" | "reduce" => Phase::Reduction,
            "quality" => Phase::Quality,
            "classes_matrices" | "class_matrices" => Phase::ClassesMatrices,
            "clustering_trees" | "cluster" | "clustering" => Phase::ClusteringTrees,
            "ending" | "end" => Phase::Ending,
            _ => return Err(ForestError::UnknownPhase(s.to_string())),
        };
        Ok(phase)
    }
}

/// Work performed for each stage.
pub trait PhaseHandler {
    fn run(&mut self, phase: Phase) -> Result<(), ForestError>;

    /// Called once `phase` has run successfully.
    fn completed(&mut self, _phase: Phase) -> Result<(), ForestError> {
        Ok(())
    }
}

/// Steps through stages in order, remembering the last one completed.
#[derive(Debug)]
pub struct PhaseMachine {
    current: Phase,
    last_completed: Option<Phase>,
    ended: bool,
}

impl PhaseMachine {
    /// Fails if starting at `start` would skip a stage after `last_completed`.
    pub fn new(start: Phase, last_completed: Option<Phase>) -> Result<Self, ForestError> {
        if !Phase::is_processable(start, last_completed) {
            return Err(ForestError::PhaseNotProcessable {
                phase: start.to_string(),
                last_completed: last_completed.map_or_else(|| "none".to_string(), |p| p.to_string()),
            });
        }
        Ok(Self {
            current: start,
            last_completed,
            ended: false,
        })
    }

    pub fn current(&self) -> Phase {
        self.current
    }

    pub fn last_completed(&self) -> Option<Phase> {
        self.last_completed
    }

    pub fn has_ended(&self) -> bool {
        self.ended
    }

    pub fn run_current<H: PhaseHandler>(&mut self, handler: &mut H) -> Result<(), ForestError> {
        let phase = self.current;
        info!("[phase] {} started", phase);
        handler.run(phase)?;
        self.last_completed = Some(phase);
        if phase == Phase::Ending {
            self.ended = true;
        }
        handler.completed(phase)?;
        info!("[phase] {} completed", phase);
        Ok(())
    }

    /// Moves to the next stage. At the terminal stage this runs the ending
    /// stage if it has not run yet, then fails with `PhaseOverrun`.
    pub fn advance<H: PhaseHandler>(&mut self, handler: &mut H) -> Result<Phase, ForestError> {
        match self.current.next() {
            Some(next) => {
                self.current = next;
                Ok(next)
            }
            None => {
                self.finish(handler)?;
                Err(ForestError::PhaseOverrun)
            }
        }
    }

    /// Runs the ending stage once, without touching the last completed stage.
    pub fn finish<H: PhaseHandler>(&mut self, handler: &mut H) -> Result<(), ForestError> {
        if !self.ended {
            info!("[phase] running {}", Phase::Ending);
            handler.run(Phase::Ending)?;
            self.ended = true;
        }
        Ok(())
    }

    /// Runs every stage from the current one through `stop`, then the ending
    /// stage if `stop` came before it.
    pub fn run_until<H: PhaseHandler>(&mut self, stop: Phase, handler: &mut H) -> Result<(), ForestError> {
        if stop < self.current {
            return Err(ForestError::Configuration(format!(
                "stop phase {} comes before start phase {}",
                stop, self.current
            )));
        }
        loop {
            self.run_current(handler)?;
            if self.current == stop {
                break;
            }
            self.advance(handler)?;
        }
        self.finish(handler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        ran: Vec<Phase>,
        completed: Vec<Phase>,
        fail_on: Option<Phase>,
    }

    impl PhaseHandler for Recorder {
        fn run(&mut self, phase: Phase) -> Result<(), ForestError> {
            if self.fail_on == Some(phase) {
                return Err(ForestError::Reduction("boom".to_string()));
            }
            self.ran.push(phase);
            Ok(())
        }

        fn completed(&mut self, phase: Phase) -> Result<(), ForestError> {
            self.completed.push(phase);
            Ok(())
        }
    }

    #[test]
    fn test_ordinals_follow_declaration_order() {
        for (i, phase) in Phase::ALL.iter().enumerate() {
            assert_eq!(phase.ordinal(), i);
        }
        assert_eq!(Phase::Ending.next(), None);
        assert_eq!(Phase::Learning.next(), Some(Phase::Reduction));
    }

    #[test]
    fn test_processable() {
        assert!(Phase::is_processable(Phase::Learning, Some(Phase::SubsubtrainSplit)));
        assert!(Phase::is_processable(Phase::Learning, Some(Phase::Learning)));
        assert!(Phase::is_processable(Phase::Parsing, Some(Phase::Learning)));
        assert!(!Phase::is_processable(Phase::Reduction, Some(Phase::SubsubtrainSplit)));
        assert!(Phase::is_processable(Phase::Parsing, None));
        assert!(!Phase::is_processable(Phase::Preprocessing, None));
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("learn".parse::<Phase>().unwrap(), Phase::Learning);
        assert_eq!("Initial-Split".parse::<Phase>().unwrap(), Phase::InitialSplit);
        for phase in Phase::ALL {
            assert_eq!(phase.to_string().parse::<Phase>().unwrap(), phase);
        }
        assert!(matches!("boost".parse::<Phase>(), Err(ForestError::UnknownPhase(_))));
    }

    #[test]
    fn test_machine_rejects_skipping() {
        assert!(matches!(
            PhaseMachine::new(Phase::Quality, Some(Phase::Learning)),
            Err(ForestError::PhaseNotProcessable { .. })
        ));
    }

    #[test]
    fn test_run_until_runs_ending_once() {
        let mut recorder = Recorder::default();
        let mut machine = PhaseMachine::new(Phase::Parsing, None).unwrap();
        machine.run_until(Phase::InitialSplit, &mut recorder).unwrap();
        assert_eq!(
            recorder.ran,
            vec![Phase::Parsing, Phase::Preprocessing, Phase::InitialSplit, Phase::Ending]
        );
        assert_eq!(recorder.completed.last(), Some(&Phase::InitialSplit));
        assert_eq!(machine.last_completed(), Some(Phase::InitialSplit));
        assert!(machine.has_ended());
    }

    #[test]
    fn test_full_run_does_not_repeat_ending() {
        let mut recorder = Recorder::default();
        let mut machine = PhaseMachine::new(Phase::Reduction, Some(Phase::Learning)).unwrap();
        machine.run_until(Phase::Ending, &mut recorder).unwrap();
        assert_eq!(recorder.ran.iter().filter(|p| **p == Phase::Ending).count(), 1);
        assert_eq!(recorder.ran.first(), Some(&Phase::Reduction));
    }

    #[test]
    fn test_advance_past_end_is_an_error_after_ending() {
        let mut recorder = Recorder::default();
        let mut machine = PhaseMachine::new(Phase::Ending, Some(Phase::ClusteringTrees)).unwrap();
        assert!(matches!(machine.advance(&mut recorder), Err(ForestError::PhaseOverrun)));
        assert_eq!(recorder.ran, vec![Phase::Ending]);
        assert!(matches!(machine.advance(&mut recorder), Err(ForestError::PhaseOverrun)));
        assert_eq!(recorder.ran.len(), 1);
    }

    #[test]
    fn test_failure_stops_progress() {
        let mut recorder = Recorder {
            fail_on: Some(Phase::InitialSplit),
            ..Recorder::default()
        };
        let mut machine = PhaseMachine::new(Phase::Parsing, None).unwrap();
        assert!(machine.run_until(Phase::Ending, &mut recorder).is_err());
        assert_eq!(machine.last_completed(), Some(Phase::Preprocessing));
        assert!(!recorder.ran.contains(&Phase::Ending));
    }
}
