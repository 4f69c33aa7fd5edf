pub mod cli_runner;
