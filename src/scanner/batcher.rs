// Bitcoin Dev Kit
// Written in 2020 by Alekos Filini <alekos.filini@gmail.com>
//
// Copyright (c) 2020-2021 Bitcoin Dev Kit Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::stream::{BoxStream, Stream, StreamExt};

/// Groups a stream of addresses into batches of `size` addresses
///
/// A batch is emitted as soon as it's full, the last one may be shorter. Addresses keep the order
/// of the input, within and across batches.
pub struct Batcher<A> {
    addresses: BoxStream<'static, A>,
    size: usize,
    batch: Vec<A>,
    done: bool,
}

impl<A> Batcher<A> {
    pub fn new<S>(addresses: S, size: usize) -> Self
    where
        S: Stream<Item = A> + Send + 'static,
    {
        let size = size.max(1);

        Batcher {
            addresses: addresses.boxed(),
            size,
            batch: Vec::with_capacity(size),
            done: false,
        }
    }
}

// neither the boxed input nor the pending batch is ever pinned
impl<A> Unpin for Batcher<A> {}

impl<A> Stream for Batcher<A> {
    type Item = Vec<A>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        loop {
            match this.addresses.poll_next_unpin(cx) {
                Poll::Ready(Some(address)) => {
                    this.batch.push(address);
                    if this.batch.len() >= this.size {
                        let full = std::mem::replace(&mut this.batch, Vec::with_capacity(this.size));
                        return Poll::Ready(Some(full));
                    }
                }
                Poll::Ready(None) => {
                    this.done = true;
                    if this.batch.is_empty() {
                        return Poll::Ready(None);
                    }

                    return Poll::Ready(Some(std::mem::take(&mut this.batch)));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
