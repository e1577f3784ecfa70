//! End-to-end pipeline tests covering the special-case scenarios.

use std::collections::{HashMap, HashSet};
use std::io::Write;

use indexmap::IndexMap;
use tempfile::{NamedTempFile, TempDir};

use datcull::collection::CollectionContext;
use datcull::provider::CriterionScore;
use datcull::{
    Criterion, Datcull, DatcullConfig, DatParser, Entry, Result, RunState, ScoreProvider, ScoreSet,
};

/// Provider that replays a fixed score table, keyed by entry name.
struct ScriptedProvider {
    scores: HashMap<String, HashMap<String, f64>>,
}

impl ScriptedProvider {
    fn new(table: &[(&str, &[(&str, f64)])]) -> Self {
        let scores = table
            .iter()
            .map(|(name, entries)| {
                (
                    name.to_string(),
                    entries
                        .iter()
                        .map(|(criterion, value)| (criterion.to_string(), *value))
                        .collect(),
                )
            })
            .collect();
        Self { scores }
    }
}

impl ScoreProvider for ScriptedProvider {
    fn score(
        &self,
        entries: &[Entry],
        criteria: &[Criterion],
        _context: Option<&CollectionContext>,
    ) -> Result<Vec<ScoreSet>> {
        Ok(entries
            .iter()
            .map(|entry| match self.scores.get(&entry.name) {
                Some(per_criterion) => {
                    let mut scores = IndexMap::new();
                    for criterion in criteria {
                        let value = per_criterion.get(&criterion.name).copied().unwrap_or(5.0);
                        scores.insert(
                            criterion.name.clone(),
                            CriterionScore {
                                score: value,
                                reasoning: Some(format!("scripted {}", criterion.name)),
                                confidence: Some(0.9),
                            },
                        );
                    }
                    ScoreSet::complete(entry.id.clone(), self.name(), scores)
                }
                None => ScoreSet::failed(entry.id.clone(), self.name(), "not in script"),
            })
            .collect())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

fn create_test_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(content.as_bytes())
        .expect("Failed to write to temp file");
    file
}

fn scenario_dat() -> NamedTempFile {
    create_test_file(
        r#"<?xml version="1.0"?>
<datafile>
  <header>
    <name>Sony - PlayStation</name>
    <version>1.0</version>
  </header>
  <game name="Chrono Saga (USA) (Disc 1)">
    <description>Chrono Saga (USA) (Disc 1)</description>
    <rom name="chrono1.bin" size="1" crc="aa00aa00"/>
  </game>
  <game name="Chrono Saga (USA) (Disc 2)">
    <description>Chrono Saga (USA) (Disc 2)</description>
    <rom name="chrono2.bin" size="2" crc="bb00bb00"/>
  </game>
  <game name="Star Racer (USA)">
    <description>Star Racer (USA)</description>
  </game>
  <game name="Star Racer (Europe)">
    <description>Star Racer (Europe)</description>
  </game>
  <game name="Star Racer (Japan)">
    <description>Star Racer (Japan)</description>
  </game>
  <game name="Obscure Pioneer (USA)">
    <description>Obscure Pioneer (USA)</description>
  </game>
  <game name="Average Filler (USA)">
    <description>Average Filler (USA)</description>
  </game>
  <game name="Mega Platformer DX (Hack)">
    <description>Mega Platformer DX (Hack)</description>
  </game>
</datafile>
"#,
    )
}

fn scenario_provider() -> ScriptedProvider {
    ScriptedProvider::new(&[
        // Disc 1 clears the threshold, disc 2 does not.
        ("Chrono Saga (USA) (Disc 1)", &[("metacritic", 8.0), ("historical", 8.0), ("mods_hacks", 8.0)]),
        ("Chrono Saga (USA) (Disc 2)", &[("metacritic", 2.0), ("historical", 2.0), ("mods_hacks", 2.0)]),
        // Three regional variants: 8.0 / 6.5 / 7.0.
        ("Star Racer (USA)", &[("metacritic", 8.0), ("historical", 8.0), ("mods_hacks", 8.0)]),
        ("Star Racer (Europe)", &[("metacritic", 6.5), ("historical", 6.5), ("mods_hacks", 6.5)]),
        ("Star Racer (Japan)", &[("metacritic", 7.0), ("historical", 7.0), ("mods_hacks", 7.0)]),
        // Low weighted score with a historical standout.
        ("Obscure Pioneer (USA)", &[("metacritic", 0.0), ("historical", 9.5), ("mods_hacks", 0.0)]),
        // Plainly mediocre.
        ("Average Filler (USA)", &[("metacritic", 4.0), ("historical", 4.0), ("mods_hacks", 4.0)]),
        // A hack that does not clear the notable bar (7.0 * 1.2 = 8.4).
        ("Mega Platformer DX (Hack)", &[("metacritic", 6.0), ("historical", 6.0), ("mods_hacks", 7.5)]),
    ])
}

fn scenario_pipeline(dir: &TempDir) -> Datcull {
    let mut config = DatcullConfig::default();
    config.active_criteria = vec![
        "metacritic".to_string(),
        "historical".to_string(),
        "mods_hacks".to_string(),
    ];
    config.run.checkpoint_dir = dir.path().to_path_buf();
    config.run.batch_size = 3;
    Datcull::with_config(config).with_provider(scenario_provider())
}

#[test]
fn test_every_entry_gets_exactly_one_decision() {
    let dir = TempDir::new().unwrap();
    let file = scenario_dat();
    let output = scenario_pipeline(&dir).curate(file.path()).unwrap();

    assert_eq!(output.state, RunState::Completed);
    let report = output.report.unwrap();
    assert_eq!(report.entries.len(), 8);

    let ids: HashSet<&str> = report
        .entries
        .iter()
        .map(|e| e.decision.entry_id.as_str())
        .collect();
    assert_eq!(ids.len(), 8, "decisions must not duplicate entries");
}

#[test]
fn test_multi_disc_scenario_keeps_both_discs() {
    let dir = TempDir::new().unwrap();
    let file = scenario_dat();
    let output = scenario_pipeline(&dir).curate(file.path()).unwrap();
    let report = output.report.unwrap();

    let disc1 = report
        .entries
        .iter()
        .find(|e| e.decision.entry_id == "Chrono Saga (USA) (Disc 1)")
        .unwrap();
    let disc2 = report
        .entries
        .iter()
        .find(|e| e.decision.entry_id == "Chrono Saga (USA) (Disc 2)")
        .unwrap();

    assert!(disc1.decision.kept);
    assert!(disc2.decision.kept, "disc 2 must ride along with disc 1");
    assert!(disc2.decision.reasoning.contains("multi_disc"));
}

#[test]
fn test_regional_scenario_keeps_only_best_region() {
    let dir = TempDir::new().unwrap();
    let file = scenario_dat();
    let output = scenario_pipeline(&dir).curate(file.path()).unwrap();
    let report = output.report.unwrap();

    let kept: HashSet<&str> = report.kept_ids().into_iter().collect();
    assert!(kept.contains("Star Racer (USA)"));
    assert!(!kept.contains("Star Racer (Europe)"));
    assert!(!kept.contains("Star Racer (Japan)"));

    let europe = report
        .entries
        .iter()
        .find(|e| e.decision.entry_id == "Star Racer (Europe)")
        .unwrap();
    assert!(europe.decision.reasoning.contains("regional_dedup"));
}

#[test]
fn test_low_score_exception_scenario() {
    let dir = TempDir::new().unwrap();
    let file = scenario_dat();
    let output = scenario_pipeline(&dir).curate(file.path()).unwrap();
    let report = output.report.unwrap();

    let pioneer = report
        .entries
        .iter()
        .find(|e| e.decision.entry_id == "Obscure Pioneer (USA)")
        .unwrap();

    assert!(pioneer.decision.weighted_score.unwrap() < 5.0);
    assert!(pioneer.decision.kept);
    assert!(pioneer.decision.reasoning.contains("low_score_exception"));
    assert_eq!(report.stats.low_score_exceptions, 1);
}

#[test]
fn test_hack_demotion_scenario() {
    let dir = TempDir::new().unwrap();
    let file = scenario_dat();
    let output = scenario_pipeline(&dir).curate(file.path()).unwrap();
    let report = output.report.unwrap();

    let hack = report
        .entries
        .iter()
        .find(|e| e.decision.entry_id == "Mega Platformer DX (Hack)")
        .unwrap();

    // Weighted 6.5 would pass the threshold; the rule demotes it anyway.
    assert!(hack.decision.weighted_score.unwrap() >= 5.0);
    assert!(!hack.decision.kept);
    assert!(hack.decision.reasoning.contains("hack_demotion"));
}

#[test]
fn test_round_trip_output_document() {
    let dir = TempDir::new().unwrap();
    let file = scenario_dat();
    let pipeline = scenario_pipeline(&dir);
    let output = pipeline.curate(file.path()).unwrap();
    let report = output.report.as_ref().unwrap();

    let out_path = dir.path().join("filtered.dat");
    pipeline.export_filtered(&output, &out_path).unwrap();
    let filtered = DatParser::new().parse_file(&out_path).unwrap();

    // Excluded entries never appear; kept entries keep their attributes.
    let kept: HashSet<&str> = report.kept_ids().into_iter().collect();
    assert_eq!(filtered.len(), kept.len());
    for entry in &filtered.entries {
        assert!(kept.contains(entry.id.as_str()));
    }

    let disc1_in = output.collection.get("Chrono Saga (USA) (Disc 1)").unwrap();
    let disc1_out = filtered.get("Chrono Saga (USA) (Disc 1)").unwrap();
    assert_eq!(disc1_in.attributes, disc1_out.attributes);
    assert_eq!(disc1_in.fields, disc1_out.fields);

    // The injected run metadata is present.
    assert_eq!(filtered.header.get("filter_provider").unwrap(), "scripted");
}

#[test]
fn test_unscripted_entry_degrades_to_incomplete() {
    let dir = TempDir::new().unwrap();
    let file = create_test_file(
        r#"<datafile>
  <header><name>Test</name></header>
  <game name="Known (USA)"><description>Known (USA)</description></game>
  <game name="Unknown (USA)"><description>Unknown (USA)</description></game>
</datafile>"#,
    );

    let mut config = DatcullConfig::default();
    config.active_criteria = vec!["metacritic".to_string()];
    config.run.checkpoint_dir = dir.path().to_path_buf();
    let provider = ScriptedProvider::new(&[("Known (USA)", &[("metacritic", 8.0)])]);
    let output = Datcull::with_config(config)
        .with_provider(provider)
        .curate(file.path())
        .unwrap();
    let report = output.report.unwrap();

    let unknown = report
        .entries
        .iter()
        .find(|e| e.decision.entry_id == "Unknown (USA)")
        .unwrap();
    assert!(!unknown.decision.kept);
    assert!(unknown.decision.incomplete_evaluation);
    assert_eq!(report.stats.incomplete, 1);

    let known = report
        .entries
        .iter()
        .find(|e| e.decision.entry_id == "Known (USA)")
        .unwrap();
    assert!(known.decision.kept);
}
