//
// Copyright (c) The Rove Project Developers
//
// SPDX-License-Identifier: MIT
//

#![warn(rust_2018_idioms)]

pub mod bytes;
pub mod task;

pub type Sender<T> = tokio::sync::mpsc::Sender<T>;
pub type Receiver<T> = tokio::sync::mpsc::Receiver<T>;
pub type UnboundedSender<T> = tokio::sync::mpsc::UnboundedSender<T>;
pub type UnboundedReceiver<T> = tokio::sync::mpsc::UnboundedReceiver<T>;
