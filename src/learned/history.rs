//! Snapshot reconstruction and training set compilation
//!
//! A record's audit log is replayed backwards from its current state: every
//! UPDATE entry is undone in turn, producing the record as it looked before
//! each correction. The current state is a VALID example, every earlier state
//! an ERRONEOUS one.

use super::features::{Label, TrainingExample};
use crate::models::{ActionType, Attribute, DerivativeRecord};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use tracing::{debug, warn};

/// Rebuild the value history of one record, newest first.
///
/// Index 0 is the current snapshot (VALID); every following entry is an older,
/// pre-correction state annotated with the field that was wrong and the value
/// it was corrected to.
pub fn reconstruct_history(record: &DerivativeRecord) -> Vec<TrainingExample> {
    let mut history = vec![TrainingExample::valid(record.snapshot.clone())];
    if record.actions.len() <= 1 {
        return history;
    }

    let updates = record
        .actions
        .iter()
        .rev()
        .filter(|a| a.action_type == ActionType::Update);

    for action in updates {
        for entry in action.update_log.iter().rev() {
            let attribute: Attribute = match entry.attribute.parse() {
                Ok(a) => a,
                Err(_) => {
                    warn!(
                        derivative_id = record.snapshot.id,
                        action_id = action.id,
                        attribute = %entry.attribute,
                        "skipping correction of unmodelled attribute"
                    );
                    continue;
                }
            };

            let mut previous = history[history.len() - 1].snapshot.clone();
            if let Err(e) = previous.set(attribute, &entry.old_value) {
                warn!(
                    derivative_id = record.snapshot.id,
                    action_id = action.id,
                    error = %e,
                    "skipping correction that cannot be replayed"
                );
                continue;
            }
            history.push(TrainingExample::erroneous(
                previous,
                attribute,
                entry.new_value.clone(),
            ));
        }
    }

    history
}

/// Labelled examples partitioned into training and test subsets
#[derive(Debug, Clone, Default, Serialize)]
pub struct TrainingData {
    pub training: Vec<TrainingExample>,
    pub test: Vec<TrainingExample>,
}

impl TrainingData {
    pub fn training_with(&self, label: Label) -> impl Iterator<Item = &TrainingExample> {
        self.training.iter().filter(move |e| e.label == label)
    }
}

/// Turn a record population into labelled examples and split them.
///
/// VALID and ERRONEOUS examples are shuffled and cut independently, so each
/// subset receives `train_fraction` (rounded) of every label.
pub fn compile_data<R: Rng + ?Sized>(
    records: &[DerivativeRecord],
    train_fraction: f64,
    rng: &mut R,
) -> TrainingData {
    let mut valid = Vec::with_capacity(records.len());
    let mut erroneous = Vec::new();

    for record in records {
        let mut history = reconstruct_history(record).into_iter();
        if let Some(current) = history.next() {
            valid.push(current);
        }
        erroneous.extend(history);
    }

    debug!(
        records = records.len(),
        valid = valid.len(),
        erroneous = erroneous.len(),
        "compiled examples"
    );

    let mut data = TrainingData::default();
    for mut examples in [valid, erroneous] {
        examples.shuffle(&mut *rng);
        let cut = ((examples.len() as f64) * train_fraction).round() as usize;
        let test = examples.split_off(cut.min(examples.len()));
        data.training.extend(examples);
        data.test.extend(test);
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Action, AttrValue, Snapshot, UpdateEntry};
    use chrono::NaiveDate;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn snapshot(id: i64) -> Snapshot {
        Snapshot {
            id,
            buying_party: "XYZ".into(),
            selling_party: "GZED20".into(),
            asset: "Stocks".into(),
            quantity: 100,
            strike_price: 10.0,
            currency_code: "USD".into(),
            date_of_trade: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            maturity_date: NaiveDate::from_ymd_opt(2025, 1, 2).unwrap(),
        }
    }

    fn action(id: i64, action_type: ActionType, update_log: Vec<UpdateEntry>) -> Action {
        Action {
            id,
            derivative_id: 1,
            user_id: Some(1),
            action_type,
            timestamp: NaiveDate::from_ymd_opt(2024, 1, 2)
                .unwrap()
                .and_hms_opt(9, 0, id as u32)
                .unwrap(),
            update_log,
            tree_id: None,
        }
    }

    fn entry(attribute: &str, old: AttrValue, new: AttrValue) -> UpdateEntry {
        UpdateEntry {
            attribute: attribute.into(),
            old_value: old,
            new_value: new,
        }
    }

    #[test]
    fn test_single_correction_yields_one_erroneous_state() {
        let record = DerivativeRecord {
            snapshot: snapshot(1),
            actions: vec![
                action(1, ActionType::Add, vec![]),
                action(2, ActionType::Update, vec![entry("buying_party", "ABC".into(), "XYZ".into())]),
            ],
        };

        let history = reconstruct_history(&record);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].label, Label::Valid);
        assert_eq!(history[0].snapshot.buying_party, "XYZ");
        assert_eq!(history[1].label, Label::Erroneous);
        assert_eq!(history[1].snapshot.buying_party, "ABC");
        assert_eq!(history[1].erroneous_field, Some(Attribute::BuyingParty));
        assert_eq!(history[1].correction, Some(AttrValue::Text("XYZ".into())));
    }

    #[test]
    fn test_single_action_yields_only_current_state() {
        let lone_update = DerivativeRecord {
            snapshot: snapshot(1),
            actions: vec![action(
                1,
                ActionType::Update,
                vec![entry("quantity", AttrValue::Int(5), AttrValue::Int(100))],
            )],
        };
        assert_eq!(reconstruct_history(&lone_update).len(), 1);

        let untouched = DerivativeRecord {
            snapshot: snapshot(2),
            actions: vec![],
        };
        assert_eq!(reconstruct_history(&untouched).len(), 1);
    }

    #[test]
    fn test_corrections_are_undone_newest_first() {
        // quantity 1 -> 10 -> 100, then strike 9.5 -> 10.0
        let record = DerivativeRecord {
            snapshot: snapshot(1),
            actions: vec![
                action(1, ActionType::Add, vec![]),
                action(2, ActionType::Update, vec![entry("quantity", AttrValue::Int(1), AttrValue::Int(10))]),
                action(3, ActionType::Update, vec![entry("quantity", AttrValue::Int(10), AttrValue::Int(100))]),
                action(4, ActionType::Update, vec![entry("strike_price", AttrValue::Float(9.5), AttrValue::Float(10.0))]),
            ],
        };

        let history = reconstruct_history(&record);
        let states: Vec<(i64, f64)> = history
            .iter()
            .map(|e| (e.snapshot.quantity, e.snapshot.strike_price))
            .collect();
        assert_eq!(states, vec![(100, 10.0), (100, 9.5), (10, 9.5), (1, 9.5)]);
        assert_eq!(history[1].erroneous_field, Some(Attribute::StrikePrice));
        assert_eq!(history[3].correction, Some(AttrValue::Int(10)));
    }

    #[test]
    fn test_unmodelled_attribute_is_skipped() {
        let record = DerivativeRecord {
            snapshot: snapshot(1),
            actions: vec![
                action(1, ActionType::Add, vec![]),
                action(2, ActionType::Update, vec![entry("notes", "a".into(), "b".into())]),
            ],
        };
        assert_eq!(reconstruct_history(&record).len(), 1);
    }

    #[test]
    fn test_compile_partitions_each_label() {
        let records: Vec<_> = (0..200)
            .map(|i| DerivativeRecord {
                snapshot: snapshot(i),
                actions: vec![
                    action(1, ActionType::Add, vec![]),
                    action(2, ActionType::Update, vec![entry("asset", "Bonds".into(), "Stocks".into())]),
                ],
            })
            .collect();

        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let data = compile_data(&records, 0.5, &mut rng);
        assert_eq!(data.training.len() + data.test.len(), 400);

        assert_eq!(data.training_with(Label::Valid).count(), 100);
        assert_eq!(data.training_with(Label::Erroneous).count(), 100);

        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let all_training = compile_data(&records, 1.0, &mut rng);
        assert!(all_training.test.is_empty());
    }

    #[test]
    fn test_rare_errors_reach_both_subsets() {
        let records: Vec<_> = (0..20)
            .map(|i| {
                let mut actions = vec![action(1, ActionType::Add, vec![])];
                if i < 3 {
                    actions.push(action(
                        2,
                        ActionType::Update,
                        vec![entry("quantity", AttrValue::Int(9000), AttrValue::Int(100))],
                    ));
                }
                DerivativeRecord {
                    snapshot: snapshot(i),
                    actions,
                }
            })
            .collect();

        for seed in 0..8 {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let data = compile_data(&records, 0.8, &mut rng);
            assert_eq!(data.training_with(Label::Erroneous).count(), 2);
            assert_eq!(data.test.iter().filter(|e| e.label == Label::Erroneous).count(), 1);
            assert_eq!(data.training_with(Label::Valid).count(), 16);
            assert_eq!(data.test.len(), 5);
        }
    }
}
