//! Supervised training of the account classifier.

pub mod checkpoint;
pub mod early_stopping;
pub mod loss;
pub mod optimizer;
pub mod predictions;
pub mod split;
pub mod trainer;

pub use checkpoint::{
    checkpoint_path, load_checkpoint, read_checkpoint_metadata, save_checkpoint, Checkpoint,
    CheckpointMetadata, CHECKPOINT_FORMAT_VERSION, METADATA_KEY,
};
pub use early_stopping::{ConvergenceCheck, EarlyStopping, StopDecision, StopReason};
pub use loss::WeightedBceLoss;
pub use optimizer::Adam;
pub use predictions::{
    read_predictions, write_predictions, PredictionRecord, PredictionsFile, PREDICTIONS_FILE,
};
pub use split::{stratified_split, DataSplit, Partition, SplitRatios};
pub use trainer::{
    EpochRecord, EvaluationReport, TrainingHistory, TrainingOrchestrator, TrainingState,
};
