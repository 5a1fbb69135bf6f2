//! Writer and catalog talking to an influx compatible http api.

use std::time::Duration;

use log::trace;
use reqwest::{Client, Response};

use super::writer::{Catalog, ConsistencyLevel, Error, PointsWriter};
use super::Point;

async fn check(response: Response) -> Result<(), Error> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    let body = response.text().await.unwrap_or_default();
    Err(Error::Status { status: status.as_u16(), body })
}

fn client(timeout: Duration) -> Result<Client, Error> {
    Ok(Client::builder().timeout(timeout).build()?)
}

#[derive(Clone)]
pub struct HttpWriter {
    client: Client,
    url: String,
}

impl HttpWriter {
    pub fn new(url: &str, timeout: Duration) -> Result<HttpWriter, Error> {
        Ok(HttpWriter { client: client(timeout)?, url: url.trim_end_matches('/').to_owned() })
    }
}

#[async_trait::async_trait]
impl PointsWriter for HttpWriter {
    async fn write_points_privileged(
        &self,
        database: &str,
        retention_policy: &str,
        consistency: ConsistencyLevel,
        points: &[Point],
    ) -> Result<(), Error> {
        let mut body = String::with_capacity(points.len() * 64);
        for point in points {
            body.push_str(&point.to_line());
            body.push('\n');
        }

        let mut query =
            vec![("db", database), ("consistency", consistency.as_str()), ("precision", "ns")];
        if !retention_policy.is_empty() {
            query.push(("rp", retention_policy));
        }

        trace!("Writing {} points to {database}", points.len());
        let response =
            self.client.post(format!("{}/write", self.url)).query(&query).body(body).send().await?;

        check(response).await
    }
}

#[derive(Clone)]
pub struct HttpCatalog {
    client: Client,
    url: String,
}

impl HttpCatalog {
    pub fn new(url: &str, timeout: Duration) -> Result<HttpCatalog, Error> {
        Ok(HttpCatalog { client: client(timeout)?, url: url.trim_end_matches('/').to_owned() })
    }
}

#[async_trait::async_trait]
impl Catalog for HttpCatalog {
    async fn create_database(&self, name: &str) -> Result<(), Error> {
        let statement = format!("CREATE DATABASE \"{}\"", name.replace('"', "\\\""));
        let response = self
            .client
            .post(format!("{}/query", self.url))
            .form(&[("q", statement.as_str())])
            .send()
            .await?;

        check(response).await
    }
}
