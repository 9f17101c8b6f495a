pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# INTERVIEW-TTS CONFIGURATION
# =============================================================================
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ~/.config/interview-tts/config.yml
#   3. /etc/interview-tts/config.yml
#
# Values of the form $env{NAME} are replaced with the environment variable
# NAME before parsing. An unset variable is a configuration error.

# =============================================================================
# STORAGE
# =============================================================================
storage:
  # One folder per project: audio files, daily logs and the project .info file
  data_dir: ~/.local/share/interview-tts/voices
  # Records and batch status tables
  database: ~/.local/share/interview-tts/interview.duckdb

# =============================================================================
# LANGUAGE MODEL (cleanup + intonation annotations)
# =============================================================================
llm:
  api_base: https://api.openai.com/v1
  api_key: $env{OPENAI_API_KEY}
  model: gpt-4o-mini
  timeout: 2m

# =============================================================================
# TEXT TO SPEECH
# =============================================================================
tts:
  api_base: https://api.openai.com/v1
  api_key: $env{OPENAI_API_KEY}
  model: gpt-4o-mini-tts
  timeout: 2m
  # Used when neither the request nor the project names a voice
  default_voice_question: onyx
  default_voice_answer: sage

# =============================================================================
# WEB
# =============================================================================
web:
  listen: 127.0.0.1:8000
"#
    .to_string()
}
