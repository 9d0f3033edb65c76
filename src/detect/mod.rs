// Package sniffing: recognise installer formats and reject error pages.

pub mod package;
