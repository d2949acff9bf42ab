use std::pin::Pin;
use std::task::{Context, Poll};

use futures::{Stream, ready};
use pgmirror_config::shared::Profile;
use pin_project_lite::pin_project;
use tokio_postgres::CopyOutStream;

use crate::conversions::copy_text::parse_copy_text_row;
use crate::error::{MirrorError, MirrorResult};
use crate::types::TableRow;

pin_project! {
    /// A stream that yields the rows of a `copy ... to stdout` operation in text format.
    ///
    /// Each data message of the COPY protocol carries exactly one row, which is parsed into a
    /// [`TableRow`] without interpreting the column values.
    #[must_use = "streams do nothing unless polled"]
    pub struct TableRowStream {
        #[pin]
        stream: CopyOutStream,
        profile: Profile,
    }
}

impl TableRowStream {
    pub fn wrap(stream: CopyOutStream, profile: Profile) -> Self {
        Self { stream, profile }
    }
}

impl Stream for TableRowStream {
    type Item = MirrorResult<TableRow>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        match ready!(this.stream.poll_next(cx)) {
            Some(Ok(row)) => Poll::Ready(Some(parse_copy_text_row(&row))),
            Some(Err(err)) => Poll::Ready(Some(Err(MirrorError::postgres(*this.profile, err)))),
            None => Poll::Ready(None),
        }
    }
}
