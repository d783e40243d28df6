//! Cross-component scenario tests and generative properties.

mod scenarios;
