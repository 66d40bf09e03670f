//! The `sondar init` command: starter config and example bank.

use anyhow::{Context, Result};

const CONFIG_TEMPLATE: &str = r#"# sondar engine configuration

max_persistence_retries = 3
retry_delay_ms = 100

[stopping]
min_responses = 5
max_responses = 30
se_threshold = 0.3

[selector]
max_category_share = 0.4
max_exposure_rate = 0.25
info_tolerance = 0.05
selection_budget_ms = 50

[estimator]
epsilon = 1e-4
max_iterations = 50
theta_min = -4.0
theta_max = 4.0
non_convergence_penalty = 1.5
max_standard_error = 1.0
"#;

const BANK_TEMPLATE: &str = r#"[questionnaire]
id = "triagem-exemplo"
name = "Triagem Exemplo"
description = "Triagem adaptativa de humor e ansiedade"

[[items]]
id = "dep-01"
text = "Nas ultimas duas semanas, senti pouco interesse ou prazer em fazer as coisas."
category = "depressao"
domain = "negative_calm"
kind = { type = "escala_intensidade", min = 1, max = 5 }
irt = { discrimination = 1.4, difficulty = -0.2, guessing = 0.1 }

[[items]]
id = "dep-02"
text = "Senti-me para baixo, deprimido ou sem perspectiva."
category = "depressao"
domain = "negative_calm"
kind = { type = "escala_intensidade", min = 1, max = 5 }
irt = { discrimination = 1.6, difficulty = 0.3, guessing = 0.1 }

[[items]]
id = "ans-01"
text = "Senti-me nervoso, ansioso ou no limite."
category = "ansiedade"
domain = "negative_activated"
kind = { type = "escala_intensidade", min = 1, max = 5 }
irt = { discrimination = 1.3, difficulty = -0.1, guessing = 0.15 }

[[items]]
id = "ans-02"
text = "Nao consegui parar de me preocupar ou controlar as preocupacoes."
category = "ansiedade"
domain = "negative_activated"
kind = { type = "escala_intensidade", min = 1, max = 5 }
irt = { discrimination = 1.2, difficulty = 0.4, guessing = 0.1 }

[[items]]
id = "hum-01"
text = "Senti-me calmo e tranquilo durante a maior parte do dia."
category = "humor"
domain = "positive_calm"
kind = { type = "escala_likert", points = 5 }
irt = { discrimination = 0.9, difficulty = 0.0, guessing = 0.2 }

[[items]]
id = "crise-01"
text = "Tive pensamentos de que seria melhor estar morto ou de me machucar."
category = "crise"
domain = "negative_activated"
kind = { type = "sim_nao" }
crisis = true

[[pattern_rules]]
type = "crisis"
id = "crise-ideacao"
items = ["crise-01"]
min_severity = 0.75

[[pattern_rules]]
type = "co_occurrence"
id = "dep-ans-comorbidade"
level = "LARANJA"
categories = [
    { category = "depressao", threshold = 0.6 },
    { category = "ansiedade", threshold = 0.6 },
]

[[pattern_rules]]
type = "deviation"
id = "desvio-populacional"

[pattern_rules.baselines.depressao]
mean = 0.35
std_dev = 0.18

[pattern_rules.baselines.ansiedade]
mean = 0.4
std_dev = 0.2

[[rules]]
id = "pular-crise-perfil-leve"
priority = 5
condition = { type = "all", conditions = [
    { type = "compare", field = "theta", op = "lt", value = -1.0 },
    { type = "compare", field = "response_count", op = "ge", value = 3.0 },
] }
actions = [{ type = "skip_category", category = "crise" }]
"#;

pub fn execute() -> Result<()> {
    write_if_absent("sondar.toml", CONFIG_TEMPLATE)?;
    std::fs::create_dir_all("banks").context("failed to create banks directory")?;
    write_if_absent("banks/exemplo.toml", BANK_TEMPLATE)?;
    Ok(())
}

fn write_if_absent(path: &str, content: &str) -> Result<()> {
    if std::path::Path::new(path).exists() {
        println!("{path} already exists, skipping");
        return Ok(());
    }
    std::fs::write(path, content).with_context(|| format!("failed to write {path}"))?;
    println!("Created {path}");
    Ok(())
}
