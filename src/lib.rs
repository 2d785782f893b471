//! # Course Cost Bot
//!
//! A Telegram bot that walks a patient through a short form (height, weight,
//! treatment category, nosology and course), estimates the course price from
//! the body surface area, and hands the contacts over to Bitrix24 as a lead.

pub mod action_log;
pub mod admin;
pub mod bot;
pub mod catalog;
pub mod catalog_api;
pub mod circuit_breaker;
pub mod config;
pub mod crm;
pub mod dialogue;
pub mod errors;
pub mod form;
pub mod localization;
pub mod pricing;
pub mod recovery;
pub mod sheets;
pub mod storage;
